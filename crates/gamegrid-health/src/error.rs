//! Health prober error types.

use std::time::Duration;

use gamegrid_ledger::LedgerError;
use gamegrid_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {node_id} unreachable: {reason}")]
    Unreachable { node_id: String, reason: String },

    #[error("probe of node {node_id} timed out after {after:?}")]
    ProbeTimeout { node_id: String, after: Duration },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type HealthResult<T> = Result<T, HealthError>;
