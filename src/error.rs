// ⚠️ Pipeline Errors
// Typed failures raised by the table layer, statistics and model code.
// File and database I/O is reported through anyhow with context instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A job asked for a column the table does not have
    #[error("column not found: {0}")]
    MissingColumn(String),

    /// Column exists but holds the other kind of data
    #[error("column {name} is not {expected}")]
    ColumnType { name: String, expected: &'static str },

    #[error("column {name} has {got} rows, table has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A statistical test was handed an empty sample
    #[error("empty sample for {0}")]
    EmptySample(String),

    /// Contingency table cannot produce a chi-square statistic
    #[error("degenerate contingency table for {column}: {reason}")]
    DegenerateTable { column: String, reason: String },

    #[error("model has not been fitted yet")]
    NotFitted,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Malformed record literal inside a log line
    #[error("cannot parse record literal at line {line}: {reason}")]
    RecordLiteral { line: usize, reason: String },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
