//! Resource ledger error types.

use gamegrid_state::{NodeStatus, ResourceKind, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient {kind} on node {node_id}: requested {requested}, available {available}")]
    Insufficient {
        node_id: String,
        kind: ResourceKind,
        requested: u64,
        available: u64,
    },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {node_id} is {status}, not accepting reservations")]
    NodeUnavailable { node_id: String, status: NodeStatus },

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
