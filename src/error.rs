//! Error types for Reserve Flux

use thiserror::Error;

/// Errors that can occur during computation
///
/// Only run-level structural problems surface here. Anything wrong with a
/// single epoch degrades to missing data instead of failing the run.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration section '{section}': {message}")]
    InvalidConfig { section: String, message: String },

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl ComputeError {
    pub(crate) fn config(section: &str, err: impl std::fmt::Display) -> Self {
        ComputeError::InvalidConfig {
            section: section.to_string(),
            message: err.to_string(),
        }
    }
}
