use thiserror::Error;

use crate::models::State;
use crate::simulation::Trajectory;

#[derive(Error, Debug)]
pub enum TwinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical instability at t={time:.4} h ({reason}); last state: {state}")]
    NumericalInstability {
        time: f64,
        state: State,
        reason: String,
        /// Samples produced before the failure.
        partial: Box<Trajectory>,
    },

    #[error("Scenario comparison failed for: {}", failed.join(", "))]
    ComparisonPartialFailure {
        failed: Vec<String>,
    },

    #[error("Calibration failed: {0}")]
    Calibration(String),

    #[error("Random number generation error")]
    Random,
}

impl TwinError {
    /// Partial trajectory attached to a numerical failure, if any.
    pub fn partial_trajectory(&self) -> Option<&Trajectory> {
        match self {
            TwinError::NumericalInstability { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub type TwinResult<T> = Result<T, TwinError>;

pub(crate) fn invalid<T>(message: impl Into<String>) -> TwinResult<T> {
    Err(TwinError::InvalidParameter(message.into()))
}
