//! Lifecycle and control-plane error types.

use std::fmt;

use gamegrid_health::HealthError;
use gamegrid_ledger::LedgerError;
use gamegrid_placement::PlacementError;
use gamegrid_registry::RegistryError;
use gamegrid_runtime::RuntimeError;
use gamegrid_state::{StateError, WorkloadStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid workload: {0}")]
    Validation(String),

    #[error("workload not found: {0}")]
    NotFound(String),

    #[error("cannot {action} workload {id} while {status}")]
    InvalidState {
        id: String,
        status: WorkloadStatus,
        action: &'static str,
    },

    #[error("provisioning of workload {id} did not finish: {reason}")]
    Interrupted { id: String, reason: String },

    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("reservation failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("health check failed: {0}")]
    Health(#[from] HealthError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Caller-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    InsufficientResources,
    NoSuitableNode,
    Runtime,
    ProbeTimeout,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InsufficientResources => "insufficient_resources",
            ErrorKind::NoSuitableNode => "no_suitable_node",
            ErrorKind::Runtime => "runtime",
            ErrorKind::ProbeTimeout => "probe_timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error returned by [`ControlPlane`](crate::ControlPlane) operations.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

impl ControlPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlPlaneError::Registry(e) => registry_kind(e),
            ControlPlaneError::Health(e) => health_kind(e),
            ControlPlaneError::Placement(e) => placement_kind(e),
            ControlPlaneError::Lifecycle(e) => lifecycle_kind(e),
        }
    }

    /// Only a capacity refusal may succeed when retried against fresh state.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::InsufficientResources
    }
}

fn registry_kind(e: &RegistryError) -> ErrorKind {
    match e {
        RegistryError::Validation(_) => ErrorKind::Validation,
        RegistryError::Conflict(_) => ErrorKind::Conflict,
        RegistryError::NotFound(_) => ErrorKind::NotFound,
        RegistryError::State(_) => ErrorKind::Internal,
    }
}

fn ledger_kind(e: &LedgerError) -> ErrorKind {
    match e {
        LedgerError::Insufficient { .. } | LedgerError::NodeUnavailable { .. } => {
            ErrorKind::InsufficientResources
        }
        LedgerError::NodeNotFound(_) => ErrorKind::NotFound,
        LedgerError::State(_) => ErrorKind::Internal,
    }
}

fn placement_kind(e: &PlacementError) -> ErrorKind {
    match e {
        PlacementError::NoSuitableNode { .. } => ErrorKind::NoSuitableNode,
        PlacementError::Validation(_) => ErrorKind::Validation,
        PlacementError::State(_) => ErrorKind::Internal,
    }
}

fn health_kind(e: &HealthError) -> ErrorKind {
    match e {
        HealthError::NodeNotFound(_) => ErrorKind::NotFound,
        HealthError::Unreachable { .. } => ErrorKind::Runtime,
        HealthError::ProbeTimeout { .. } => ErrorKind::ProbeTimeout,
        HealthError::Registry(e) => registry_kind(e),
        HealthError::Ledger(e) => ledger_kind(e),
    }
}

fn lifecycle_kind(e: &LifecycleError) -> ErrorKind {
    match e {
        LifecycleError::Validation(_) => ErrorKind::Validation,
        LifecycleError::NotFound(_) => ErrorKind::NotFound,
        LifecycleError::InvalidState { .. } => ErrorKind::Conflict,
        LifecycleError::Interrupted { .. } => ErrorKind::Internal,
        LifecycleError::Placement(e) => placement_kind(e),
        LifecycleError::Ledger(e) => ledger_kind(e),
        LifecycleError::Runtime(_) => ErrorKind::Runtime,
        LifecycleError::Health(e) => health_kind(e),
        LifecycleError::Registry(e) => registry_kind(e),
        LifecycleError::State(_) => ErrorKind::Internal,
    }
}
