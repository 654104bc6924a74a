//! Error types for latent-space anomaly scoring

use thiserror::Error;

/// Result type alias for scoring operations
pub type Result<T> = std::result::Result<T, ScoringError>;

/// Main error type for fitting and scoring
#[derive(Error, Debug)]
pub enum ScoringError {
    /// Batch shapes disagree (row counts or vector widths)
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Too few reference samples for the requested model complexity
    #[error("Insufficient samples for {model}: need at least {required}, got {actual}")]
    InsufficientSamples {
        model: String,
        required: usize,
        actual: usize,
    },

    /// Covariance not invertible even after regularization
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Iterative fit exhausted its budget. Reported as a diagnostic on the fit
    /// result, never returned from `fit` itself.
    #[error("Convergence failed after {iterations} iterations")]
    NonConvergence { iterations: usize },

    /// Score vectors handed to the aggregator differ in length
    #[error("Length mismatch for {method}: expected {expected}, got {actual}")]
    LengthMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ScoringError {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        ScoringError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn insufficient(model: impl Into<String>, required: usize, actual: usize) -> Self {
        ScoringError::InsufficientSamples {
            model: model.into(),
            required,
            actual,
        }
    }

    pub(crate) fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ScoringError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for ScoringError {
    fn from(err: polars::error::PolarsError) -> Self {
        ScoringError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(err: serde_json::Error) -> Self {
        ScoringError::SerializationError(err.to_string())
    }
}
