//! BoundedRuntime — per-call timeouts and a single retry for reads.
//!
//! Wraps any [`ContainerRuntime`]. Reads (`ping`, `list_containers`,
//! `stats`, `inspect`, `logs`) get the read timeout and are attempted a
//! second time after a transient failure. Mutations get the call timeout and
//! are never retried, so a create or start is never issued twice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use gamegrid_state::ConnectionConfig;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

/// Timeouts applied by [`BoundedRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTimeouts {
    /// Bound for each attempt of an idempotent read.
    pub read: Duration,
    /// Bound for state-mutating calls.
    pub call: Duration,
}

impl Default for RuntimeTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            call: Duration::from_secs(30),
        }
    }
}

/// Decorator that bounds every runtime call.
#[derive(Clone)]
pub struct BoundedRuntime {
    inner: Arc<dyn ContainerRuntime>,
    timeouts: RuntimeTimeouts,
}

impl BoundedRuntime {
    pub fn new(inner: Arc<dyn ContainerRuntime>, timeouts: RuntimeTimeouts) -> Self {
        Self { inner, timeouts }
    }

    pub fn timeouts(&self) -> RuntimeTimeouts {
        self.timeouts
    }

    async fn bounded<T>(
        operation: &'static str,
        limit: Duration,
        fut: impl Future<Output = RuntimeResult<T>>,
    ) -> RuntimeResult<T> {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout {
                operation,
                after: limit,
            }),
        }
    }

    async fn read<T, F, Fut>(&self, operation: &'static str, call: F) -> RuntimeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RuntimeResult<T>>,
    {
        match Self::bounded(operation, self.timeouts.read, call()).await {
            Err(e) if e.is_transient() => {
                warn!(operation, error = %e, "runtime read failed, retrying once");
                Self::bounded(operation, self.timeouts.read, call()).await
            }
            other => other,
        }
    }

    async fn mutate<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = RuntimeResult<T>>,
    ) -> RuntimeResult<T> {
        Self::bounded(operation, self.timeouts.call, fut).await
    }
}

#[async_trait]
impl ContainerRuntime for BoundedRuntime {
    async fn ping(&self, conn: &ConnectionConfig) -> RuntimeResult<()> {
        self.read("ping", || self.inner.ping(conn)).await
    }

    async fn list_containers(&self, conn: &ConnectionConfig) -> RuntimeResult<Vec<ContainerSummary>> {
        self.read("list_containers", || self.inner.list_containers(conn))
            .await
    }

    async fn stats(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerStats> {
        self.read("stats", || self.inner.stats(conn, handle)).await
    }

    async fn inspect(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerState> {
        self.read("inspect", || self.inner.inspect(conn, handle)).await
    }

    async fn logs(&self, conn: &ConnectionConfig, handle: &str, tail: usize) -> RuntimeResult<String> {
        self.read("logs", || self.inner.logs(conn, handle, tail)).await
    }

    async fn create_container(&self, conn: &ConnectionConfig, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.mutate("create_container", self.inner.create_container(conn, spec))
            .await
    }

    async fn start(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.mutate("start", self.inner.start(conn, handle)).await
    }

    async fn stop(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.mutate("stop", self.inner.stop(conn, handle)).await
    }

    async fn restart(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.mutate("restart", self.inner.restart(conn, handle)).await
    }

    async fn remove(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        self.mutate("remove", self.inner.remove(conn, handle)).await
    }
}
