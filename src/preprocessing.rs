// 🧹 Preprocessing - engineered table to model-ready matrix
// Drop sparse numeric columns, one-hot encode text, scale, and keep the
// features most correlated (Spearman) with TARGET.

use crate::config::PreprocessingConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::SK_ID_CURR;
use crate::significance::{average_ranks, TARGET};
use crate::table::{Column, Table};
use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fill value for missing categories before encoding
pub const UNKNOWN_CATEGORY: &str = "unknown";

pub const SCALER_FILE: &str = "scaler.json";

// ============================================================================
// COLUMN CLEANUP
// ============================================================================

/// Drop numeric columns whose missing share (percent) exceeds `threshold_pct`
pub fn drop_missing_numeric_columns(table: &Table, threshold_pct: f64) -> PipelineResult<Table> {
    let n = table.n_rows().max(1) as f64;
    let mut out = Table::new();
    for (name, column) in table.columns() {
        let missing_pct = column.missing_count() as f64 * 100.0 / n;
        if column.is_numeric() && missing_pct > threshold_pct {
            debug!(column = name, missing_pct, "dropping sparse column");
            continue;
        }
        out.add_column(name, column.clone())?;
    }
    Ok(out)
}

/// Spaces to underscores, upper case
pub fn normalize_name(name: &str) -> String {
    name.replace(' ', "_").to_uppercase()
}

/// One-hot encode every text column, missing values as `unknown`.
///
/// Encoded columns come first (`<COL>_<VALUE>`, categories sorted), then the
/// remaining columns in their original order. All names are normalized.
pub fn encode_categorical(table: &Table) -> PipelineResult<Table> {
    let mut encoded = Table::new();
    let mut passthrough = Table::new();

    for (name, column) in table.columns() {
        match column {
            Column::Text(values) => {
                let filled: Vec<&str> = values
                    .iter()
                    .map(|v| v.as_deref().unwrap_or(UNKNOWN_CATEGORY))
                    .collect();
                let categories: BTreeSet<&str> = filled.iter().copied().collect();
                for category in categories {
                    let indicator = filled
                        .iter()
                        .map(|&v| if v == category { 1.0 } else { 0.0 })
                        .collect();
                    encoded.add_numeric(normalize_name(&format!("{}_{}", name, category)), indicator)?;
                }
            }
            Column::Numeric(_) => passthrough.add_column(normalize_name(name), column.clone())?,
        }
    }

    for (name, column) in passthrough.columns() {
        encoded.add_column(name, column.clone())?;
    }
    Ok(encoded)
}

/// Named numeric columns as a row-major matrix
pub fn to_matrix<S: AsRef<str>>(table: &Table, names: &[S]) -> PipelineResult<Array2<f64>> {
    let mut matrix = Array2::<f64>::zeros((table.n_rows(), names.len()));
    for (j, name) in names.iter().enumerate() {
        let values = table.numeric(name.as_ref())?;
        matrix.column_mut(j).assign(&Array1::from_vec(values.to_vec()));
    }
    Ok(matrix)
}

// ============================================================================
// SCALER
// ============================================================================

/// Per-feature standardization fitted on the training rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    /// Population standard deviation, 1 for constant columns
    pub scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>, feature_names: Vec<String>) -> PipelineResult<Self> {
        if feature_names.len() != x.ncols() {
            return Err(PipelineError::DimensionMismatch {
                expected: x.ncols(),
                got: feature_names.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(PipelineError::EmptySample("scaler input".to_string()));
        }

        let means = x.mean_axis(Axis(0)).ok_or(PipelineError::NotFitted)?;
        let scales = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self {
            feature_names,
            means: means.to_vec(),
            scales: scales.to_vec(),
        })
    }

    pub fn transform(&self, x: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        if x.ncols() != self.means.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: self.means.len(),
                got: x.ncols(),
            });
        }
        let means = Array1::from_vec(self.means.clone());
        let scales = Array1::from_vec(self.scales.clone());
        Ok((x - &means) / &scales)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize scaler")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write scaler {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse scaler")
    }
}

// ============================================================================
// CORRELATION RANKING
// ============================================================================

/// Spearman rank correlation; NaN when either side is constant
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let (rx, _) = average_ranks(x);
    let (ry, _) = average_ranks(y);
    pearson(&rx, &ry)
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let (sd_x, sd_y) = (x.std_dev(), y.std_dev());
    if !(sd_x > 0.0 && sd_y > 0.0) {
        return f64::NAN;
    }
    x.covariance(y) / (sd_x * sd_y)
}

/// The `limit` features with the largest |Spearman| against the target.
///
/// NaN correlations are skipped; ties keep column order.
pub fn top_correlated(
    x: &Array2<f64>,
    names: &[String],
    target: &[f64],
    limit: usize,
) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = names
        .iter()
        .zip(x.axis_iter(Axis(1)))
        .map(|(name, column)| (name.clone(), spearman(&column.to_vec(), target)))
        .filter(|(_, rho)| !rho.is_nan())
        .collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    ranked.truncate(limit);
    ranked
}

// ============================================================================
// JOB
// ============================================================================

#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Selected scaled features followed by TARGET
    pub table: Table,
    pub scaler: StandardScaler,
    pub correlations: Vec<(String, f64)>,
}

pub fn preprocess(table: &Table, config: &PreprocessingConfig) -> PipelineResult<Preprocessed> {
    let kept = drop_missing_numeric_columns(table, config.missing_threshold_pct)?;
    let encoded = encode_categorical(&kept)?.drop_missing_rows();
    if encoded.n_rows() == 0 {
        return Err(PipelineError::EmptySample(
            "no complete rows after encoding".to_string(),
        ));
    }

    let target = encoded.numeric(TARGET)?.to_vec();
    let feature_names: Vec<String> = encoded
        .column_names()
        .iter()
        .filter(|name| name.as_str() != SK_ID_CURR && name.as_str() != TARGET)
        .cloned()
        .collect();

    let scaler = StandardScaler::fit(&to_matrix(&encoded, &feature_names)?, feature_names.clone())?;
    let scaled = scaler.transform(&to_matrix(&encoded, &feature_names)?)?;

    // TARGET itself takes the first of the top_k slots
    let correlations = top_correlated(
        &scaled,
        &feature_names,
        &target,
        config.top_k_features.saturating_sub(1),
    );

    let mut out = Table::new();
    for (name, _) in &correlations {
        let j = feature_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.clone()))?;
        out.add_numeric(name.as_str(), scaled.column(j).to_vec())?;
    }
    out.add_numeric(TARGET, target)?;

    Ok(Preprocessed {
        table: out,
        scaler,
        correlations,
    })
}

/// Scaler location for a processed output file
pub fn scaler_path(output: &Path) -> PathBuf {
    output.with_file_name(SCALER_FILE)
}

pub fn run(input: &Path, output: &Path, config: &PreprocessingConfig) -> Result<Preprocessed> {
    info!(input = %input.display(), "Starting preprocessing");
    let raw = Table::read_csv(input)?;
    let processed = preprocess(&raw, config)
        .with_context(|| format!("Failed to preprocess {}", input.display()))?;

    processed.table.write_csv(output)?;
    processed.scaler.save(&scaler_path(output))?;

    info!(
        rows = processed.table.n_rows(),
        features = processed.correlations.len(),
        output = %output.display(),
        "Processed data saved"
    );
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn raw() -> Table {
        Table::from_columns(vec![
            ("SK_ID_CURR", Column::Numeric(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            ("TARGET", Column::Numeric(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0])),
            ("AMT_INCOME", Column::Numeric(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0])),
            ("AMT_NOISE", Column::Numeric(vec![3.0, 1.0, 2.0, 2.0, 3.0, 1.0])),
            ("SPARSE", Column::Numeric(vec![1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0])),
            ("CONSTANT", Column::Numeric(vec![7.0; 6])),
            (
                "Contract type",
                Column::text_from(&[
                    Some("Cash loans"),
                    Some("Revolving loans"),
                    None,
                    Some("Cash loans"),
                    Some("Revolving loans"),
                    Some("Revolving loans"),
                ]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_drop_missing_numeric_columns() {
        let kept = drop_missing_numeric_columns(&raw(), 1.0).unwrap();
        assert!(!kept.has_column("SPARSE"));
        assert!(kept.has_column("Contract type"));

        let lenient = drop_missing_numeric_columns(&raw(), 20.0).unwrap();
        assert!(lenient.has_column("SPARSE"));
    }

    #[test]
    fn test_one_hot_layout() {
        let kept = drop_missing_numeric_columns(&raw(), 1.0).unwrap();
        let encoded = encode_categorical(&kept).unwrap();

        assert_eq!(
            encoded.column_names(),
            &[
                "CONTRACT_TYPE_CASH_LOANS",
                "CONTRACT_TYPE_REVOLVING_LOANS",
                "CONTRACT_TYPE_UNKNOWN",
                "SK_ID_CURR",
                "TARGET",
                "AMT_INCOME",
                "AMT_NOISE",
                "CONSTANT",
            ]
        );
        assert_eq!(
            encoded.numeric("CONTRACT_TYPE_UNKNOWN").unwrap(),
            &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_scaler_standardizes_and_handles_constants() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(&x, vec!["A".into(), "B".into()]).unwrap();
        let scaled = scaler.transform(&x).unwrap();

        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_spearman() {
        assert!((spearman(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]) - 1.0).abs() < 1e-12);
        assert!((spearman(&[1.0, 2.0, 3.0], &[9.0, 4.0, 1.0]) + 1.0).abs() < 1e-12);
        assert!(spearman(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_preprocess_keeps_top_features_and_target() {
        let config = PreprocessingConfig {
            missing_threshold_pct: 1.0,
            top_k_features: 3,
        };
        let processed = preprocess(&raw(), &config).unwrap();

        let names = processed.table.column_names();
        assert_eq!(names.len(), 3);
        // |rho| 0.88 for income, 0.45 for the missing contract type
        assert_eq!(names[0], "AMT_INCOME");
        assert_eq!(names[1], "CONTRACT_TYPE_UNKNOWN");
        assert_eq!(names[2], "TARGET");
        assert!(!names.iter().any(|n| n == "CONSTANT" || n == "SK_ID_CURR"));
        assert_eq!(processed.table.n_rows(), 6);
        assert!(processed.correlations.iter().all(|(_, rho)| !rho.is_nan()));
    }

    #[test]
    fn test_run_writes_data_and_scaler() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("application_result.csv");
        let output = dir.path().join("processed_data.csv");
        raw().write_csv(&input).unwrap();

        run(&input, &output, &PreprocessingConfig::default()).unwrap();

        let written = Table::read_csv(&output).unwrap();
        assert_eq!(written.column_names().last().unwrap(), "TARGET");
        let scaler = StandardScaler::load(&scaler_path(&output)).unwrap();
        assert!(scaler.feature_names.contains(&"AMT_INCOME".to_string()));
    }
}
