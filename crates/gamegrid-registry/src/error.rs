//! Node registry error types.

use gamegrid_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid node: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
