//! Error types for the decision engine.
//!
//! Recoverable conditions (`OptimizationFailure`, `PredictorUnavailable`) are
//! handled where they occur and only surface here so callers that want the
//! raw outcome can inspect it. Everything else is rejected at the call
//! boundary.

use thiserror::Error;

use crate::models::AccountId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Portfolio optimization failed: {0}")]
    OptimizationFailure(String),

    #[error("Predictor unavailable: {0}")]
    PredictorUnavailable(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("Duplicate account: {0}")]
    DuplicateAccount(AccountId),

    #[error("Episode finished at step {step}; call reset() before stepping again")]
    EpisodeFinished { step: usize },
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
