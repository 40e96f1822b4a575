//! Error types for the ensemble

use crate::types::PredictorId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnsembleError>;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Invalid symbol {0}: expected a value in 0..=3")]
    InvalidSymbol(i64),

    #[error("Predictor {predictor} failed: {reason}")]
    PredictorFault {
        predictor: PredictorId,
        reason: String,
    },

    #[error("Task queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("State update rejected: {0}")]
    StateUpdate(String),

    #[error("Unknown batch: {0}")]
    UnknownBatch(String),

    #[error("Batch processing cancelled")]
    Cancelled,

    #[error("Sequence store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnsembleError {
    pub fn fault(predictor: PredictorId, reason: impl Into<String>) -> Self {
        Self::PredictorFault {
            predictor,
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for EnsembleError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
