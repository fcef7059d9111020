// 📈 Default Model - L2 logistic regression with grid-searched C
// Stratified split, k-fold CV scored by ROC-AUC, JSON model artifact.

use crate::config::TrainingConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::SK_ID_CURR;
use crate::preprocessing::to_matrix;
use crate::significance::TARGET;
use crate::table::Table;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// LOGISTIC REGRESSION
// ============================================================================

/// Binary classifier fitted by batch gradient descent.
///
/// Minimizes mean log-loss + ||w||^2 / (2 C n); the intercept is not penalized.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    pub c: f64,
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    learning_rate: f64,
    max_iter: usize,
    tolerance: f64,
    pub cost_history: Vec<f64>,
}

impl LogisticRegression {
    pub fn new(c: f64, config: &TrainingConfig) -> PipelineResult<Self> {
        if !(c.is_finite() && c > 0.0) {
            return Err(PipelineError::InvalidParameter(format!(
                "C must be positive, got {}",
                c
            )));
        }
        Ok(Self {
            c,
            coefficients: None,
            intercept: None,
            learning_rate: config.learning_rate,
            max_iter: config.max_iter,
            tolerance: config.tolerance,
            cost_history: Vec::new(),
        })
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> PipelineResult<()> {
        if x.nrows() == 0 {
            return Err(PipelineError::EmptySample("training rows".to_string()));
        }
        if y.len() != x.nrows() {
            return Err(PipelineError::DimensionMismatch {
                expected: x.nrows(),
                got: y.len(),
            });
        }

        let n = x.nrows() as f64;
        let penalty = 1.0 / (self.c * n);
        // keeps the update contractive when the penalty dominates
        let step = self.learning_rate / (1.0 + penalty);

        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        self.cost_history.clear();

        for iter in 0..self.max_iter {
            let predictions = (x.dot(&weights) + bias).mapv(sigmoid);

            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n + &weights * penalty;
            let db = errors.sum() / n;

            let cost = log_loss(y, &predictions) + weights.dot(&weights) * penalty / 2.0;
            self.cost_history.push(cost);

            weights = &weights - &(dw * step);
            bias -= step * db;

            if iter > 0 && (self.cost_history[iter - 1] - cost).abs() < self.tolerance {
                debug!(c = self.c, iter, "converged");
                break;
            }
        }

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        Ok(())
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let weights = self.coefficients.as_ref().ok_or(PipelineError::NotFitted)?;
        let bias = self.intercept.ok_or(PipelineError::NotFitted)?;
        probabilities(x, weights, bias)
    }
}

fn probabilities(x: &Array2<f64>, weights: &Array1<f64>, bias: f64) -> PipelineResult<Array1<f64>> {
    if x.ncols() != weights.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: weights.len(),
            got: x.ncols(),
        });
    }
    Ok((x.dot(weights) + bias).mapv(sigmoid))
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

fn log_loss(y: &Array1<f64>, p: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    -y.iter()
        .zip(p.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / y.len() as f64
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Area under the ROC curve (trapezoid over tied scores).
///
/// 0.5 when only one class is present.
pub fn roc_auc(y: &[f64], scores: &[f64]) -> f64 {
    let mut pairs: Vec<(f64, bool)> = scores
        .iter()
        .zip(y)
        .map(|(&s, &t)| (s, t >= 0.5))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let n_pos = pairs.iter().filter(|(_, t)| *t).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut tpr_prev, mut fpr_prev) = (0.0, 0.0);
    let mut auc = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == score {
            if pairs[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let (tpr, fpr) = (tp / n_pos, fp / n_neg);
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }
    auc
}

/// Row indices per class (TARGET >= 0.5 is positive), each shuffled
fn shuffled_classes(y: &[f64], rng: &mut StdRng) -> [Vec<usize>; 2] {
    let mut classes: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, &t) in y.iter().enumerate() {
        classes[usize::from(t >= 0.5)].push(i);
    }
    for class in classes.iter_mut() {
        class.shuffle(rng);
    }
    classes
}

/// Stratified (train, test) row indices, both sorted
pub fn stratified_split(
    y: &[f64],
    test_size: f64,
    seed: u64,
) -> PipelineResult<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::InvalidParameter(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in shuffled_classes(y, &mut rng) {
        let n_test = (class.len() as f64 * test_size).round() as usize;
        test.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// `k` stratified (train, validation) folds; every row validates exactly once
pub fn stratified_kfold(
    y: &[f64],
    k: usize,
    seed: u64,
) -> PipelineResult<Vec<(Vec<usize>, Vec<usize>)>> {
    if k < 2 || k > y.len() {
        return Err(PipelineError::InvalidParameter(format!(
            "cannot make {} folds from {} rows",
            k,
            y.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_of = vec![0usize; y.len()];
    for class in shuffled_classes(y, &mut rng) {
        for (position, &row) in class.iter().enumerate() {
            fold_of[row] = position % k;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&row| fold_of[row] == fold);
            (train, validation)
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub best_c: f64,
    /// Mean validation AUC of `best_c`
    pub cv_auc: f64,
    /// (C, mean validation AUC) in grid order
    pub scores: Vec<(f64, f64)>,
}

/// Pick C by mean ROC-AUC over stratified folds; ties keep the earlier C
pub fn grid_search(
    x: &Array2<f64>,
    y: &Array1<f64>,
    config: &TrainingConfig,
) -> PipelineResult<GridSearchResult> {
    if config.c_grid.is_empty() {
        return Err(PipelineError::InvalidParameter("empty C grid".to_string()));
    }
    let labels = y.to_vec();
    let folds = stratified_kfold(&labels, config.cv_folds, config.seed)?;

    let mut scores = Vec::with_capacity(config.c_grid.len());
    for &c in &config.c_grid {
        let mut total = 0.0;
        for (train, validation) in &folds {
            let mut model = LogisticRegression::new(c, config)?;
            model.fit(&x.select(Axis(0), train), &y.select(Axis(0), train))?;
            let proba = model.predict_proba(&x.select(Axis(0), validation))?;
            let truth: Vec<f64> = validation.iter().map(|&i| labels[i]).collect();
            total += roc_auc(&truth, &proba.to_vec());
        }
        let mean_auc = total / folds.len() as f64;
        debug!(c, auc = mean_auc, "cross-validated");
        scores.push((c, mean_auc));
    }

    let (best_c, cv_auc) = scores
        .iter()
        .copied()
        .fold((f64::NAN, f64::NEG_INFINITY), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });
    Ok(GridSearchResult {
        best_c,
        cv_auc,
        scores,
    })
}

// ============================================================================
// MODEL ARTIFACT
// ============================================================================

/// Fitted model as saved to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub c: f64,
    pub cv_auc: f64,
    pub test_auc: f64,
    pub trained_at: DateTime<Utc>,
    /// SHA-256 (hex) of the training CSV
    pub training_file_sha256: String,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize model")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write model {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse model")
    }

    /// Default probability for each row of an already scaled feature matrix
    pub fn predict_proba(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let weights = Array1::from_vec(self.coefficients.clone());
        probabilities(x, &weights, self.intercept)
    }

    /// Score a processed table by the model's feature names
    pub fn predict_table(&self, table: &Table) -> PipelineResult<Array1<f64>> {
        self.predict_proba(&to_matrix(table, &self.feature_names)?)
    }
}

// ============================================================================
// TRAINING JOB
// ============================================================================

/// Feature columns of a processed table
pub fn feature_columns(table: &Table) -> Vec<String> {
    table
        .column_names()
        .iter()
        .filter(|name| name.as_str() != SK_ID_CURR && name.as_str() != TARGET)
        .cloned()
        .collect()
}

/// Fit on an in-memory processed table
pub fn fit_artifact(
    table: &Table,
    config: &TrainingConfig,
    training_file_sha256: String,
) -> PipelineResult<ModelArtifact> {
    let feature_names = feature_columns(table);
    let x = to_matrix(table, &feature_names)?;
    let y = Array1::from_vec(table.numeric(TARGET)?.to_vec());

    let (train_rows, test_rows) = stratified_split(&y.to_vec(), config.test_size, config.seed)?;
    let x_train = x.select(Axis(0), &train_rows);
    let y_train = y.select(Axis(0), &train_rows);

    let search = grid_search(&x_train, &y_train, config)?;
    info!(best_c = search.best_c, cv_auc = search.cv_auc, "Grid search finished");

    let mut model = LogisticRegression::new(search.best_c, config)?;
    model.fit(&x_train, &y_train)?;

    let test_proba = model.predict_proba(&x.select(Axis(0), &test_rows))?;
    let test_truth: Vec<f64> = test_rows.iter().map(|&i| y[i]).collect();
    let test_auc = roc_auc(&test_truth, &test_proba.to_vec());

    let coefficients = model.coefficients.ok_or(PipelineError::NotFitted)?;
    let intercept = model.intercept.ok_or(PipelineError::NotFitted)?;
    Ok(ModelArtifact {
        feature_names,
        coefficients: coefficients.to_vec(),
        intercept,
        c: search.best_c,
        cv_auc: search.cv_auc,
        test_auc,
        trained_at: Utc::now(),
        training_file_sha256,
    })
}

/// Train on `input` (processed CSV) and write the model JSON to `model_out`
pub fn train(input: &Path, model_out: &Path, config: &TrainingConfig) -> Result<ModelArtifact> {
    info!(input = %input.display(), "Starting model training");
    let bytes = std::fs::read(input)
        .with_context(|| format!("Failed to read training data {}", input.display()))?;
    let digest = format!("{:x}", Sha256::digest(&bytes));
    let table = Table::from_reader(bytes.as_slice(), None)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    let artifact = fit_artifact(&table, config, digest)
        .with_context(|| format!("Failed to train on {}", input.display()))?;
    artifact.save(model_out)?;

    info!(
        c = artifact.c,
        cv_auc = artifact.cv_auc,
        test_auc = artifact.test_auc,
        model = %model_out.display(),
        "Model saved"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use ndarray::array;

    /// Separable on the first feature; the second is periodic noise
    fn separable(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let label = (i % 2) as f64;
            let jitter = ((i * 7) % 11) as f64 / 11.0 - 0.5;
            x[[i, 0]] = 2.0 * label - 1.0 + jitter;
            x[[i, 1]] = ((i * 3) % 5) as f64 - 2.0;
            y[i] = label;
        }
        (x, y)
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            c_grid: vec![0.01, 1.0, 100.0],
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&[1.0, 1.0, 0.0, 0.0], &[0.1, 0.2, 0.8, 0.9]), 0.0);
        // all tied scores sit on the diagonal
        assert_eq!(roc_auc(&[0.0, 1.0, 0.0, 1.0], &[0.5; 4]), 0.5);
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.3, 0.7]), 0.5);
        assert!((roc_auc(&[0.0, 1.0, 0.0, 1.0], &[0.1, 0.3, 0.35, 0.8]) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_fit_learns_direction_and_cost_decreases() {
        let (x, y) = separable(60);
        let mut model = LogisticRegression::new(1.0, &TrainingConfig::default()).unwrap();
        model.fit(&x, &y).unwrap();

        let weights = model.coefficients.as_ref().unwrap();
        assert!(weights[0] > 0.0);
        assert!(weights[0].abs() > weights[1].abs());
        let first = model.cost_history[0];
        let last = *model.cost_history.last().unwrap();
        assert!(last < first);

        let proba = model.predict_proba(&x).unwrap();
        assert!(roc_auc(&y.to_vec(), &proba.to_vec()) > 0.99);
    }

    #[test]
    fn test_stronger_penalty_shrinks_weights() {
        let (x, y) = separable(60);
        let norm = |c: f64| {
            let mut model = LogisticRegression::new(c, &TrainingConfig::default()).unwrap();
            model.fit(&x, &y).unwrap();
            let w = model.coefficients.unwrap();
            w.dot(&w)
        };
        assert!(norm(0.01) < norm(10.0));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(LogisticRegression::new(0.0, &TrainingConfig::default()).is_err());

        let model = LogisticRegression::new(1.0, &TrainingConfig::default()).unwrap();
        assert!(matches!(
            model.predict_proba(&array![[1.0, 2.0]]),
            Err(PipelineError::NotFitted)
        ));

        let mut model = LogisticRegression::new(1.0, &TrainingConfig::default()).unwrap();
        assert!(model.fit(&array![[1.0], [2.0]], &array![1.0]).is_err());
    }

    #[test]
    fn test_stratified_split_keeps_class_shares() {
        let y: Vec<f64> = (0..50).map(|i| if i < 10 { 1.0 } else { 0.0 }).collect();
        let (train, test) = stratified_split(&y, 0.2, 42).unwrap();

        assert_eq!(test.len(), 10);
        assert_eq!(train.len(), 40);
        assert_eq!(test.iter().filter(|&&i| y[i] == 1.0).count(), 2);
        assert!(test.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stratified_split(&y, 0.2, 42).unwrap(), (train, test));
        assert!(stratified_split(&y, 1.0, 42).is_err());
    }

    #[test]
    fn test_kfold_covers_every_row_once() {
        let y: Vec<f64> = (0..23).map(|i| (i % 3 == 0) as u8 as f64).collect();
        let folds = stratified_kfold(&y, 5, 7).unwrap();

        assert_eq!(folds.len(), 5);
        let mut seen = vec![0; y.len()];
        for (train, validation) in &folds {
            assert_eq!(train.len() + validation.len(), y.len());
            for &row in validation {
                seen[row] += 1;
            }
            assert!(validation.iter().any(|&i| y[i] == 1.0));
        }
        assert!(seen.iter().all(|&count| count == 1));
        assert!(stratified_kfold(&y, 1, 7).is_err());
    }

    #[test]
    fn test_grid_search_scores_every_c() {
        let (x, y) = separable(80);
        let search = grid_search(&x, &y, &config()).unwrap();

        assert_eq!(search.scores.len(), 3);
        assert!(config().c_grid.contains(&search.best_c));
        assert!(search.cv_auc > 0.95);
    }

    #[test]
    fn test_artifact_floats_survive_save_and_load() {
        let artifact = ModelArtifact {
            feature_names: vec!["EXT_SOURCE_MEAN".to_string(), "AMT_CREDIT".to_string()],
            coefficients: vec![0.011064637601843563, -1.2345678901234567e-7],
            intercept: -2.4413486197403457,
            c: 0.1,
            cv_auc: 0.7312930841002397,
            test_auc: 0.7288102476532985,
            trained_at: Utc::now(),
            training_file_sha256: "0".repeat(64),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded.coefficients, artifact.coefficients);
        assert_eq!(loaded.intercept.to_bits(), artifact.intercept.to_bits());
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_train_writes_loadable_artifact() {
        let (x, y) = separable(100);
        let table = Table::from_columns(vec![
            ("FEATURE_SIGNAL", Column::Numeric(x.column(0).to_vec())),
            ("FEATURE_NOISE", Column::Numeric(x.column(1).to_vec())),
            ("TARGET", Column::Numeric(y.to_vec())),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("processed_data.csv");
        let model_out = dir.path().join("model.json");
        table.write_csv(&input).unwrap();

        let artifact = train(&input, &model_out, &config()).unwrap();
        assert_eq!(artifact.feature_names, vec!["FEATURE_SIGNAL", "FEATURE_NOISE"]);
        assert_eq!(artifact.training_file_sha256.len(), 64);
        assert!(artifact.test_auc > 0.95);

        let loaded = ModelArtifact::load(&model_out).unwrap();
        assert_eq!(loaded, artifact);
        let proba = loaded.predict_table(&table).unwrap();
        assert_eq!(proba.len(), 100);
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
