//! Metrics backend error types.

use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors from querying a metrics backend. All of them are transient from
/// the controller's point of view.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid backend url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("metrics request failed: {0}")]
    Request(String),

    #[error("metrics request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("metrics backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode metrics response: {0}")]
    Decode(String),

    #[error("unexpected result from metrics backend: {0}")]
    UnexpectedResult(String),
}
