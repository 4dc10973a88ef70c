//! The container runtime contract.

use async_trait::async_trait;

use gamegrid_state::ConnectionConfig;

use crate::error::RuntimeResult;
use crate::types::{ContainerSpec, ContainerState, ContainerStats, ContainerSummary};

/// Remote container runtime reachable through a node's connection config.
///
/// No call is assumed atomic beyond what it returns; callers treat every
/// method as a fallible remote call.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime answers.
    async fn ping(&self, conn: &ConnectionConfig) -> RuntimeResult<()>;

    /// Running containers on the node.
    async fn list_containers(&self, conn: &ConnectionConfig) -> RuntimeResult<Vec<ContainerSummary>>;

    /// One-shot resource counters for a container.
    async fn stats(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerStats>;

    async fn inspect(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerState>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn logs(&self, conn: &ConnectionConfig, handle: &str, tail: usize) -> RuntimeResult<String>;

    /// Create a container and return its handle. Does not start it.
    async fn create_container(&self, conn: &ConnectionConfig, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()>;

    async fn stop(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()>;

    async fn restart(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()>;

    /// Force-remove a container.
    async fn remove(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()>;
}
