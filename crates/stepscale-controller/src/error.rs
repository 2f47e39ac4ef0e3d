//! Controller error types.

use thiserror::Error;

use stepscale_autoscale::{CalculatorError, HistoryError};
use stepscale_state::StateError;

/// Errors that can end a reconciliation cycle.
///
/// Only `Transient` failures are retried with backoff. The rest wait for
/// the next resync or policy change.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),
}

impl ControllerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControllerError::Transient(_))
    }

    /// Short label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::NotFound(_) => "not_found",
            ControllerError::Configuration(_) => "configuration",
            ControllerError::Validation(_) => "validation",
            ControllerError::Transient(_) => "transient",
        }
    }
}

impl From<StateError> for ControllerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => ControllerError::NotFound(what),
            other => ControllerError::Transient(other.into()),
        }
    }
}

impl From<CalculatorError> for ControllerError {
    fn from(e: CalculatorError) -> Self {
        ControllerError::Transient(e.into())
    }
}

impl From<HistoryError> for ControllerError {
    fn from(e: HistoryError) -> Self {
        ControllerError::Configuration(e.to_string())
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
