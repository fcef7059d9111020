// ⚙️ Pipeline Configuration - file + environment layering
// Data locations, significance thresholds, preprocessing and training settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Thresholds and resampling settings for feature significance tests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceConfig {
    /// Quantile of the chi-square distribution used as critical value
    pub chi2_confidence: f64,

    /// Mann-Whitney features with p below this are kept
    pub mann_whitney_alpha: f64,

    pub bootstrap_iterations: usize,

    /// Two-sided alpha of the bootstrap confidence interval
    pub bootstrap_alpha: f64,

    /// Interval bounds this close to zero count as "no difference"
    pub ci_zero_margin: f64,

    pub seed: u64,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            chi2_confidence: 0.95,
            mann_whitney_alpha: 0.05,
            bootstrap_iterations: 1000,
            bootstrap_alpha: 0.05,
            ci_zero_margin: 0.001,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Numeric columns missing in more than this percent of rows are dropped
    pub missing_threshold_pct: f64,

    /// Size of the correlation ranking, the target included
    pub top_k_features: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            missing_threshold_pct: 1.0,
            top_k_features: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_size: f64,
    pub cv_folds: usize,
    pub seed: u64,
    /// Inverse regularization strengths tried by the grid search
    pub c_grid: Vec<f64>,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            cv_folds: 5,
            seed: 42,
            c_grid: vec![0.001, 0.01, 0.1, 1.0, 10.0, 100.0],
            learning_rate: 0.1,
            max_iter: 2000,
            tolerance: 1e-7,
        }
    }
}

/// PostgreSQL server used by `db --postgres`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub database: String,
    pub host: String,
    pub port: u16,

    /// Overridden by `DB_USER` when set
    pub user: Option<String>,

    /// Overridden by `DB_PASSWORD` when set
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database: "home_credit".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: None,
            password: None,
        }
    }
}

impl PostgresConfig {
    pub const USER_VAR: &'static str = "DB_USER";
    pub const PASSWORD_VAR: &'static str = "DB_PASSWORD";

    /// Take credentials from `lookup` (normally the process environment)
    pub fn with_credentials_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(user) = lookup(Self::USER_VAR) {
            self.user = Some(user);
        }
        if let Some(password) = lookup(Self::PASSWORD_VAR) {
            self.password = Some(password);
        }
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the raw Home Credit CSV files
    pub data_dir: PathBuf,

    /// SQLite database used by the `db` commands
    pub database_path: PathBuf,

    pub postgres: PostgresConfig,

    pub significance: SignificanceConfig,
    pub preprocessing: PreprocessingConfig,
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_path: PathBuf::from("home_credit.db"),
            postgres: PostgresConfig::default(),
            significance: SignificanceConfig::default(),
            preprocessing: PreprocessingConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `config/pipeline.*` and `CREDIT_PIPELINE__*` environment variables.
    ///
    /// PostgreSQL credentials come from `DB_USER` / `DB_PASSWORD` when set.
    pub fn load() -> anyhow::Result<Self> {
        let config_result = config::Config::builder()
            .add_source(config::File::with_name("config/pipeline").required(false))
            .add_source(config::Environment::with_prefix("CREDIT_PIPELINE").separator("__"))
            .build();

        let mut loaded: Self = match config_result {
            Ok(cfg) => cfg
                .try_deserialize()
                .map_err(|e| anyhow::anyhow!("Failed to deserialize config: {}", e))?,
            Err(e) => {
                tracing::info!("No usable config ({}), using default configuration", e);
                Self::default()
            }
        };
        loaded.postgres = loaded
            .postgres
            .with_credentials_from(|name| std::env::var(name).ok());
        Ok(loaded)
    }

    /// Path of a raw file inside `data_dir`
    pub fn data_file(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}
