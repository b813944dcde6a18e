//! Error taxonomy of the dropout-risk pipeline
//!
//! - `DataSource`: unreadable or malformed raw input, aborts the batch run
//! - `DataQuality`: degenerate data (duplicate keys, empty critical column,
//!   single-class split), aborts the batch run
//! - `EncodingMismatch`: an inference row that cannot be aligned with the
//!   training manifest, reported per call

use dropout_gbdt::ModelError;
use dropout_trainer::TrainerError;
use thiserror::Error;

/// A single-row input could not be aligned with the feature manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("encoding mismatch on column `{column}`: {reason}")]
pub struct EncodingMismatchError {
    pub column: String,
    pub reason: String,
}

impl EncodingMismatchError {
    pub fn new(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data source error ({source_name}): {reason}")]
    DataSource { source_name: String, reason: String },

    #[error("data quality error: {0}")]
    DataQuality(String),

    #[error(transparent)]
    EncodingMismatch(#[from] EncodingMismatchError),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("training error: {0}")]
    Training(#[from] TrainerError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn data_source(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataSource {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is fatal for a batch run (as opposed to a single
    /// failed prediction).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EncodingMismatch(_))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
