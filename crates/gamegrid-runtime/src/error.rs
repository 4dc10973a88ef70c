//! Container runtime error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by container runtime calls.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("runtime api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RuntimeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }

    /// Whether an idempotent read may be attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::Connection(_) | RuntimeError::Timeout { .. }
        ) || matches!(self, RuntimeError::Api { status, .. } if *status >= 500)
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
