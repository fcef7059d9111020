// 🧮 Feature Builders - one per Home Credit source table
// Each builder turns raw rows into one row of derived features per borrower.

pub mod application;
pub mod bureau;
pub mod bureau_balance;
pub mod credit_card_balance;
pub mod installments_payments;
pub mod previous_application;

use crate::error::{PipelineError, PipelineResult};
use crate::table::{Column, Key, Table};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SK_ID_CURR: &str = "SK_ID_CURR";
pub const SK_ID_PREV: &str = "SK_ID_PREV";
pub const SK_ID_BUREAU: &str = "SK_ID_BUREAU";

// ============================================================================
// FEATURE SETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FeatureSet {
    Application,
    Bureau,
    BureauBalance,
    CreditCardBalance,
    InstallmentsPayments,
    PreviousApplication,
}

impl FeatureSet {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureSet::Application => "application_features",
            FeatureSet::Bureau => "bureau_features",
            FeatureSet::BureauBalance => "bureau_balance_features",
            FeatureSet::CreditCardBalance => "credit_card_balance_features",
            FeatureSet::InstallmentsPayments => "installments_payments_features",
            FeatureSet::PreviousApplication => "previous_application_features",
        }
    }

    /// Raw files read by the builder, in `build` argument order
    pub fn input_files(&self) -> &'static [&'static str] {
        match self {
            FeatureSet::Application => &["application.csv"],
            FeatureSet::Bureau => &["bureau.csv"],
            FeatureSet::BureauBalance => &["bureau_balance.csv", "bureau.csv"],
            FeatureSet::CreditCardBalance => &["credit_card_balance.csv"],
            FeatureSet::InstallmentsPayments => &["installments_payments.csv"],
            FeatureSet::PreviousApplication => &["previous_application.csv"],
        }
    }

    pub fn output_file(&self) -> String {
        format!("{}.csv", self.name())
    }

    pub fn build(&self, inputs: &[Table]) -> PipelineResult<Table> {
        let expected = self.input_files().len();
        if inputs.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                got: inputs.len(),
            });
        }

        match self {
            FeatureSet::Application => application::build_application_features(&inputs[0]),
            FeatureSet::Bureau => bureau::build_bureau_features(&inputs[0]),
            FeatureSet::BureauBalance => {
                bureau_balance::build_bureau_balance_features(&inputs[0], &inputs[1])
            }
            FeatureSet::CreditCardBalance => {
                credit_card_balance::build_credit_card_balance_features(&inputs[0])
            }
            FeatureSet::InstallmentsPayments => {
                installments_payments::build_installments_payments_features(&inputs[0])
            }
            FeatureSet::PreviousApplication => {
                previous_application::build_previous_application_features(&inputs[0])
            }
        }
    }

    /// Read inputs, build features, write the output CSV
    pub fn run(&self, inputs: &[PathBuf], output: &Path) -> Result<Table> {
        info!("Starting to create {}", self.name());

        let tables = inputs
            .iter()
            .map(|path| Table::read_csv(path))
            .collect::<Result<Vec<_>>>()?;
        let features = self.build(&tables)?;
        features.write_csv(output)?;

        info!(
            rows = features.n_rows(),
            columns = features.n_cols(),
            output = %output.display(),
            "{} successfully created",
            self.name()
        );
        Ok(features)
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Element-wise combination of two equally long columns
pub(crate) fn zip_with(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect()
}

/// Floor division with NaN propagation
pub(crate) fn floor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

/// Per-group value written back onto every member row; other rows get NaN
pub(crate) fn broadcast<K>(
    groups: &BTreeMap<K, Vec<usize>>,
    n_rows: usize,
    f: impl Fn(&[usize]) -> f64,
) -> Vec<f64> {
    let mut out = vec![f64::NAN; n_rows];
    for rows in groups.values() {
        let value = f(rows);
        for &row in rows {
            out[row] = value;
        }
    }
    out
}

/// Gather `values` at `rows`
pub(crate) fn pick(values: &[f64], rows: &[usize]) -> Vec<f64> {
    rows.iter().map(|&i| values[i]).collect()
}

/// Cell as a string, whatever the column type ("1" for a numeric 1.0)
pub(crate) fn cell_label(column: &Column, row: usize) -> Option<String> {
    column.key_at(row).map(|k| k.to_string())
}

/// Key column for grouped output: the key value of each group's first row
pub(crate) fn group_key_column(
    table: &Table,
    key: &str,
    groups: &BTreeMap<Key, Vec<usize>>,
) -> PipelineResult<Column> {
    let firsts: Vec<usize> = groups.values().map(|rows| rows[0]).collect();
    Ok(table.column(key)?.take(&firsts))
}
