//! Error taxonomy for the engine
//!
//! Everything surfaced from the library boundary is an `EngineError`.
//! Business clamps (oversell, partial fills, defaulted-asset interest) are
//! not errors; they are recorded as `RunWarning`s on the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Specialized Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// The main error type for engine operations
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Inputs violate a stated precondition
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation ordering violation (e.g. query before setup)
    #[error("state error: {0}")]
    State(String),

    /// Numerical routine failed (non-convergence, bad matrix)
    #[error("numerical error: {0}")]
    Numerical(String),

    /// A per-period balance identity failed beyond tolerance
    #[error("consistency error in period {period}: {message}")]
    Consistency { period: usize, message: String },

    /// Cooperative cancellation during Monte-Carlo or scenario runs
    #[error("run cancelled")]
    Cancelled,

    /// Input bundle could not be read
    #[error("input error: {0}")]
    Input(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

/// A tolerated business-rule deviation recorded during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWarning {
    /// Period in which the clamp occurred (0 = setup)
    pub period: usize,
    /// What was clamped or skipped
    pub message: String,
}

impl RunWarning {
    pub fn new(period: usize, message: impl Into<String>) -> Self {
        Self {
            period,
            message: message.into(),
        }
    }
}
