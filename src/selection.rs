// 🎯 Significance Selection Jobs
// Attach TARGET to a source table, keep only the columns that separate
// defaulters from the rest, and write them with the source's id columns.

use crate::config::{PipelineConfig, SignificanceConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{SK_ID_BUREAU, SK_ID_CURR, SK_ID_PREV};
use crate::significance::{classify_features, select_significant_features, NumericTest, TARGET};
use crate::table::Table;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::info;

const APPLICATION_FILE: &str = "application.csv";
const BUREAU_FILE: &str = "bureau.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dataset {
    Application,
    PreviousApplication,
    BureauBalance,
    InstallmentsPayments,
    PosCashBalance,
}

impl Dataset {
    pub fn name(&self) -> &'static str {
        match self {
            Dataset::Application => "application",
            Dataset::PreviousApplication => "previous_application",
            Dataset::BureauBalance => "bureau_balance",
            Dataset::InstallmentsPayments => "installments_payments",
            Dataset::PosCashBalance => "POS_CASH_balance",
        }
    }

    pub fn source_file(&self) -> String {
        format!("{}.csv", self.name())
    }

    pub fn output_file(&self) -> String {
        format!("{}_result.csv", self.name())
    }

    /// Columns never tested as numeric features
    pub fn id_columns(&self) -> &'static [&'static str] {
        match self {
            Dataset::Application => &[TARGET, SK_ID_CURR],
            Dataset::PreviousApplication
            | Dataset::InstallmentsPayments
            | Dataset::PosCashBalance => &[TARGET, SK_ID_CURR, SK_ID_PREV],
            Dataset::BureauBalance => &[TARGET, SK_ID_CURR, SK_ID_BUREAU],
        }
    }

    /// Columns appended after the selected features
    pub fn output_id_columns(&self) -> &'static [&'static str] {
        match self {
            Dataset::Application => &[SK_ID_CURR, TARGET],
            Dataset::PreviousApplication | Dataset::PosCashBalance => &[SK_ID_CURR, SK_ID_PREV],
            Dataset::BureauBalance => &[SK_ID_BUREAU],
            Dataset::InstallmentsPayments => &[],
        }
    }

    /// Application rows are tested with the bootstrap, the larger tables with Mann-Whitney
    pub fn default_test(&self) -> NumericTest {
        match self {
            Dataset::Application => NumericTest::Bootstrap,
            _ => NumericTest::MannWhitney,
        }
    }

    /// Attach TARGET to the source rows.
    ///
    /// `applications` must hold SK_ID_CURR and TARGET; `bureau` (SK_ID_BUREAU
    /// and SK_ID_CURR) is only read for bureau_balance. Rows without a match
    /// are dropped.
    pub fn attach_target(
        &self,
        source: &Table,
        applications: &Table,
        bureau: Option<&Table>,
    ) -> PipelineResult<Table> {
        let targets = applications.select(&[SK_ID_CURR, TARGET])?;
        match self {
            Dataset::Application => Ok(source.clone()),
            Dataset::BureauBalance => {
                let bureau = bureau.ok_or_else(|| {
                    PipelineError::InvalidParameter(
                        "bureau_balance needs the bureau table to reach SK_ID_CURR".to_string(),
                    )
                })?;
                let owners = bureau.select(&[SK_ID_BUREAU, SK_ID_CURR])?;
                source
                    .inner_join(&owners, SK_ID_BUREAU)?
                    .inner_join(&targets, SK_ID_CURR)
            }
            _ => source.inner_join(&targets, SK_ID_CURR),
        }
    }

    /// Significant columns followed by the output id columns
    pub fn select<R: Rng + ?Sized>(
        &self,
        labelled: &Table,
        numeric_test: NumericTest,
        config: &SignificanceConfig,
        rng: &mut R,
    ) -> PipelineResult<Table> {
        let groups = classify_features(labelled, TARGET, self.id_columns());
        let mut columns = select_significant_features(
            labelled,
            TARGET,
            &groups,
            numeric_test,
            config,
            rng,
        )?;
        for id in self.output_id_columns() {
            if !columns.iter().any(|c| c == id) {
                columns.push(id.to_string());
            }
        }
        labelled.select(&columns)
    }

    /// Read the raw files, select, write `output`
    pub fn run(
        &self,
        config: &PipelineConfig,
        numeric_test: Option<NumericTest>,
        output: &Path,
    ) -> Result<Table> {
        info!("Starting to create {}_result", self.name());
        let numeric_test = numeric_test.unwrap_or_else(|| self.default_test());

        let source = Table::read_csv(&config.data_file(&self.source_file()))?;
        let applications = match self {
            Dataset::Application => source.select(&[SK_ID_CURR, TARGET])?,
            _ => Table::read_csv_columns(&config.data_file(APPLICATION_FILE), &[SK_ID_CURR, TARGET])?,
        };
        let bureau = match self {
            Dataset::BureauBalance => Some(Table::read_csv_columns(
                &config.data_file(BUREAU_FILE),
                &[SK_ID_CURR, SK_ID_BUREAU],
            )?),
            _ => None,
        };

        let labelled = self.attach_target(&source, &applications, bureau.as_ref())?;
        let mut rng = StdRng::seed_from_u64(config.significance.seed);
        let result = self.select(&labelled, numeric_test, &config.significance, &mut rng)?;
        result.write_csv(output)?;

        info!(
            test = ?numeric_test,
            rows = result.n_rows(),
            columns = result.n_cols(),
            output = %output.display(),
            "{}_result successfully created",
            self.name()
        );
        Ok(result)
    }

    pub fn default_output(&self, config: &PipelineConfig) -> PathBuf {
        config.data_file(&self.output_file())
    }
}
