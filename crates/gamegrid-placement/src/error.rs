//! Placement error types.

use gamegrid_state::{ResourceVector, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error(
        "no suitable node: {online} online, none with {} millicores, {} MB RAM, {} GB storage free",
        .requested.cpu_millis, .requested.ram_mb, .requested.storage_gb
    )]
    NoSuitableNode {
        requested: ResourceVector,
        online: usize,
    },

    #[error("invalid placement request: {0}")]
    Validation(String),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
