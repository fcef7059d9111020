// Home Credit Default Pipeline - Core Library
// Feature engineering, significance selection, log parsing, preprocessing,
// model training and SQLite / PostgreSQL access, shared by the CLI and tests

pub mod agg;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod log_parsing;
pub mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod preprocessing;
pub mod selection;
pub mod significance;
pub mod table;

// Re-export commonly used types
pub use agg::Agg;
pub use config::{
    PipelineConfig, PostgresConfig, PreprocessingConfig, SignificanceConfig, TrainingConfig,
};
pub use db::{DatabaseConnector, SqlConnector};
pub use error::{PipelineError, PipelineResult};
pub use features::FeatureSet;
pub use log_parsing::{LogTables, LogValue};
pub use model::{LogisticRegression, ModelArtifact};
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnector;
pub use preprocessing::{Preprocessed, StandardScaler};
pub use selection::Dataset;
pub use significance::{NumericTest, TARGET};
pub use table::{Column, Key, Table};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
