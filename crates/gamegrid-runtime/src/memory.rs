//! In-memory container runtime with scriptable failures.
//!
//! Containers are kept per node address. Tests mark addresses unreachable,
//! inject one-shot or persistent failures per [`Operation`], add latency to
//! every call, and read back per-operation call counts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use gamegrid_state::{ConnectionConfig, epoch_secs};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

/// Runtime operations, used to script failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Ping,
    ListContainers,
    Stats,
    Inspect,
    Logs,
    Create,
    Start,
    Stop,
    Restart,
    Remove,
}

#[derive(Debug, Clone)]
struct MemContainer {
    spec: ContainerSpec,
    running: bool,
    exit_code: Option<i64>,
    started_at: Option<u64>,
    stats: ContainerStats,
    logs: Vec<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// address → container id → container
    nodes: BTreeMap<String, BTreeMap<String, MemContainer>>,
    unreachable: HashSet<String>,
    fail_next: HashMap<Operation, VecDeque<RuntimeError>>,
    fail_after: HashMap<Operation, VecDeque<RuntimeError>>,
    fail_always: HashMap<Operation, RuntimeError>,
    calls: HashMap<Operation, usize>,
    latency: Option<Duration>,
}

impl Inner {
    /// Container id for a handle, which may be the id or the container name.
    fn resolve(&self, address: &str, handle: &str) -> RuntimeResult<String> {
        let containers = self
            .nodes
            .get(address)
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))?;
        if containers.contains_key(handle) {
            return Ok(handle.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.spec.name == handle)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))
    }

    fn container_mut(&mut self, address: &str, handle: &str) -> RuntimeResult<&mut MemContainer> {
        let id = self.resolve(address, handle)?;
        self.nodes
            .get_mut(address)
            .and_then(|containers| containers.get_mut(&id))
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))
    }

    /// A scripted error for a call whose effect has already been applied.
    fn lost_reply(&mut self, op: Operation) -> RuntimeResult<()> {
        match self.fail_after.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(?op, "injected failure after effect");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// A [`ContainerRuntime`] that keeps containers in memory.
#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call against `address` fail with a connection error.
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut inner = self.lock();
        if unreachable {
            inner.unreachable.insert(address.to_string());
        } else {
            inner.unreachable.remove(address);
        }
    }

    /// Fail the next call of `op` with `err`. Queued errors are consumed in order.
    pub fn fail_next(&self, op: Operation, err: RuntimeError) {
        self.lock().fail_next.entry(op).or_default().push_back(err);
    }

    /// Apply the next call of `op` but report `err`, as when the engine acts
    /// and the reply never arrives.
    pub fn fail_next_after_effect(&self, op: Operation, err: RuntimeError) {
        self.lock().fail_after.entry(op).or_default().push_back(err);
    }

    /// Fail every call of `op` with `err` until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, op: Operation, err: RuntimeError) {
        self.lock().fail_always.insert(op, err);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.fail_next.clear();
        inner.fail_after.clear();
        inner.fail_always.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Replace the stats reported for a container.
    pub fn set_stats(&self, handle: &str, stats: ContainerStats) {
        let mut inner = self.lock();
        for containers in inner.nodes.values_mut() {
            if let Some(container) = containers.get_mut(handle) {
                container.stats = stats;
                return;
            }
        }
    }

    /// Append a log line to a container.
    pub fn push_log(&self, handle: &str, line: impl Into<String>) {
        let line = line.into();
        let mut inner = self.lock();
        for containers in inner.nodes.values_mut() {
            if let Some(container) = containers.get_mut(handle) {
                container.logs.push(line);
                return;
            }
        }
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Containers (running or not) known at `address`.
    pub fn containers(&self, address: &str) -> Vec<ContainerSummary> {
        self.lock()
            .nodes
            .get(address)
            .map(|containers| {
                containers
                    .iter()
                    .map(|(id, c)| summary(id, c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of containers across all addresses.
    pub fn container_count(&self) -> usize {
        self.lock().nodes.values().map(BTreeMap::len).sum()
    }

    pub fn is_running(&self, handle: &str) -> bool {
        self.lock()
            .nodes
            .values()
            .find_map(|containers| containers.get(handle))
            .is_some_and(|c| c.running)
    }

    /// Apply latency, count the call, and surface any scripted failure.
    async fn enter(&self, op: Operation, conn: &ConnectionConfig) -> RuntimeResult<String> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let address = conn.address();
        let mut inner = self.lock();
        *inner.calls.entry(op).or_insert(0) += 1;

        if inner.unreachable.contains(&address) {
            return Err(RuntimeError::Connection(format!("{address}: connection refused")));
        }
        if let Some(err) = inner.fail_next.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!(?op, %address, "injected one-shot failure");
            return Err(err);
        }
        if let Some(err) = inner.fail_always.get(&op) {
            return Err(err.clone());
        }
        Ok(address)
    }
}

fn summary(id: &str, container: &MemContainer) -> ContainerSummary {
    ContainerSummary {
        id: id.to_string(),
        name: container.spec.name.clone(),
        state: if container.running { "running" } else { "exited" }.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn ping(&self, conn: &ConnectionConfig) -> RuntimeResult<()> {
        self.enter(Operation::Ping, conn).await.map(|_| ())
    }

    async fn list_containers(&self, conn: &ConnectionConfig) -> RuntimeResult<Vec<ContainerSummary>> {
        let address = self.enter(Operation::ListContainers, conn).await?;
        let inner = self.lock();
        Ok(inner
            .nodes
            .get(&address)
            .map(|containers| {
                containers
                    .iter()
                    .filter(|(_, c)| c.running)
                    .map(|(id, c)| summary(id, c))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stats(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerStats> {
        let address = self.enter(Operation::Stats, conn).await?;
        let mut inner = self.lock();
        Ok(inner.container_mut(&address, handle)?.stats.clone())
    }

    async fn inspect(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<ContainerState> {
        let address = self.enter(Operation::Inspect, conn).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(&address, handle)?;
        Ok(ContainerState {
            status: if container.running { "running" } else { "exited" }.to_string(),
            running: container.running,
            exit_code: container.exit_code,
            started_at: container.started_at.map(|t| t.to_string()),
            error: None,
        })
    }

    async fn logs(&self, conn: &ConnectionConfig, handle: &str, tail: usize) -> RuntimeResult<String> {
        let address = self.enter(Operation::Logs, conn).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(&address, handle)?;
        let skip = container.logs.len().saturating_sub(tail);
        Ok(container.logs[skip..].join("\n"))
    }

    async fn create_container(&self, conn: &ConnectionConfig, spec: &ContainerSpec) -> RuntimeResult<String> {
        let address = self.enter(Operation::Create, conn).await?;
        let mut inner = self.lock();

        let name_taken = inner
            .nodes
            .get(&address)
            .is_some_and(|containers| containers.values().any(|c| c.spec.name == spec.name));
        if name_taken {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container name {} already in use", spec.name),
            });
        }

        inner.next_id += 1;
        let id = format!("mem-{}", inner.next_id);
        let container = MemContainer {
            spec: spec.clone(),
            running: false,
            exit_code: None,
            started_at: None,
            stats: ContainerStats {
                online_cpus: 1,
                memory_limit_bytes: spec.memory_limit_mb.unwrap_or(0) * 1024 * 1024,
                ..ContainerStats::default()
            },
            logs: Vec::new(),
        };
        inner
            .nodes
            .entry(address.clone())
            .or_default()
            .insert(id.clone(), container);
        debug!(%address, container_id = %id, name = %spec.name, "container created");
        inner.lost_reply(Operation::Create)?;
        Ok(id)
    }

    async fn start(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        let address = self.enter(Operation::Start, conn).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(&address, handle)?;
        if !container.running {
            container.running = true;
            container.exit_code = None;
            container.started_at = Some(epoch_secs());
        }
        inner.lost_reply(Operation::Start)
    }

    async fn stop(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        let address = self.enter(Operation::Stop, conn).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(&address, handle)?;
        if container.running {
            container.running = false;
            container.exit_code = Some(0);
        }
        inner.lost_reply(Operation::Stop)
    }

    async fn restart(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        let address = self.enter(Operation::Restart, conn).await?;
        let mut inner = self.lock();
        let container = inner.container_mut(&address, handle)?;
        container.running = true;
        container.exit_code = None;
        container.started_at = Some(epoch_secs());
        inner.lost_reply(Operation::Restart)
    }

    async fn remove(&self, conn: &ConnectionConfig, handle: &str) -> RuntimeResult<()> {
        let address = self.enter(Operation::Remove, conn).await?;
        let mut inner = self.lock();
        let id = inner.resolve(&address, handle)?;
        if let Some(containers) = inner.nodes.get_mut(&address) {
            containers.remove(&id);
        }
        inner.lost_reply(Operation::Remove)
    }
}
