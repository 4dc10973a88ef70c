//! Health monitor — periodic probing, one background task per node.
//!
//! Each monitored node gets its own task that sleeps for the probe
//! interval and then probes, so a slow or dead node only ever delays its
//! own next probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gamegrid_registry::{NodeFilter, NodeRegistry};
use gamegrid_state::NodeId;

use crate::error::HealthResult;
use crate::prober::HealthProber;
use crate::report::ProbeOutcome;

/// Per-node monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs periodic probes for every registered node.
pub struct HealthMonitor {
    prober: HealthProber,
    registry: NodeRegistry,
    interval: Duration,
    /// Active monitors: node_id → slot.
    monitors: Arc<RwLock<HashMap<NodeId, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(prober: HealthProber, registry: NodeRegistry) -> Self {
        Self {
            prober,
            registry,
            interval: Duration::from_secs(30),
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start probing a node every interval. Replaces an existing monitor.
    pub async fn start_monitor(&self, node_id: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let node = node_id.to_string();
        let prober = self.prober.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            run_probe_loop(&node, prober, interval, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            node_id.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%node_id, interval = ?self.interval, "health monitor started");
    }

    pub async fn stop_monitor(&self, node_id: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(node_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%node_id, "health monitor stopped");
        }
    }

    /// Match the set of monitors to the registered nodes.
    ///
    /// Starts monitors for new nodes and stops those of deleted nodes.
    pub async fn sync_with_registry(&self) -> HealthResult<()> {
        let registered: Vec<NodeId> = self
            .registry
            .list(&NodeFilter::default())?
            .into_iter()
            .map(|n| n.id)
            .collect();
        let active = self.active_monitors().await;

        for node_id in active.iter().filter(|id| !registered.contains(id)) {
            self.stop_monitor(node_id).await;
        }
        for node_id in registered.iter().filter(|id| !active.contains(id)) {
            self.start_monitor(node_id).await;
        }
        Ok(())
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (id, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(node_id = %id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Node ids with an active monitor, sorted.
    pub async fn active_monitors(&self) -> Vec<NodeId> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<NodeId> = monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_monitoring(&self, node_id: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(node_id)
    }
}

/// The probe loop for a single node.
async fn run_probe_loop(
    node_id: &str,
    prober: HealthProber,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%node_id, "probe loop starting");
    let mut last_outcome: Option<ProbeOutcome> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match prober.probe(node_id).await {
                    Ok(report) => {
                        if last_outcome.is_some_and(|o| o != report.outcome) {
                            info!(%node_id, outcome = ?report.outcome, status = %report.status, "node health changed");
                        }
                        last_outcome = Some(report.outcome);
                    }
                    Err(crate::HealthError::NodeNotFound(_)) => {
                        warn!(%node_id, "node no longer registered, probe loop exiting");
                        break;
                    }
                    Err(e) => {
                        error!(%node_id, error = %e, "failed to apply probe result");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(%node_id, "probe loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamegrid_ledger::ResourceLedger;
    use gamegrid_registry::NewNode;
    use gamegrid_runtime::InMemoryRuntime;
    use gamegrid_state::{ConnectionConfig, NodeStatus, ResourceVector, StateStore};

    fn setup(interval_ms: u64) -> (NodeRegistry, Arc<InMemoryRuntime>, HealthMonitor) {
        let store = StateStore::open_in_memory().unwrap();
        let registry = NodeRegistry::new(store.clone());
        let runtime = Arc::new(InMemoryRuntime::new());
        let prober = HealthProber::new(registry.clone(), ResourceLedger::new(store), runtime.clone())
            .with_timeout(Duration::from_millis(100));
        let monitor = HealthMonitor::new(prober, registry.clone())
            .with_interval(Duration::from_millis(interval_ms));
        (registry, runtime, monitor)
    }

    fn add_node(registry: &NodeRegistry, name: &str) {
        registry
            .create(NewNode {
                name: name.to_string(),
                location: "eu-west".to_string(),
                coordinates: None,
                connection: ConnectionConfig {
                    host: format!("{name}.internal"),
                    port: 2375,
                    api_key: "key".to_string(),
                },
                totals: ResourceVector::from_cores(2, 4096, 50),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn monitor_starts_and_stops() {
        let (_, _, monitor) = setup(1_000);
        assert!(monitor.active_monitors().await.is_empty());

        monitor.start_monitor("node-a").await;
        assert!(monitor.is_monitoring("node-a").await);

        monitor.stop_monitor("node-a").await;
        assert!(!monitor.is_monitoring("node-a").await);
    }

    #[tokio::test]
    async fn monitor_replaces_existing_monitor() {
        let (_, _, monitor) = setup(1_000);
        monitor.start_monitor("node-a").await;
        monitor.start_monitor("node-a").await;

        assert_eq!(monitor.active_monitors().await.len(), 1);
        monitor.stop_all().await;
        assert!(monitor.active_monitors().await.is_empty());
    }

    #[tokio::test]
    async fn sync_follows_registry() {
        let (registry, _, monitor) = setup(1_000);
        add_node(&registry, "node-a");
        add_node(&registry, "node-b");

        monitor.sync_with_registry().await.unwrap();
        assert_eq!(monitor.active_monitors().await, vec!["node-a", "node-b"]);

        registry.delete("node-a").unwrap();
        monitor.sync_with_registry().await.unwrap();
        assert_eq!(monitor.active_monitors().await, vec!["node-b"]);

        monitor.stop_all().await;
    }

    #[tokio::test]
    async fn periodic_probes_update_status() {
        let (registry, runtime, monitor) = setup(20);
        add_node(&registry, "node-a");
        add_node(&registry, "node-b");
        runtime.set_unreachable("node-b.internal:2375", true);

        monitor.sync_with_registry().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.stop_all().await;

        assert_eq!(registry.get("node-a").unwrap().status, NodeStatus::Online);
        let b = registry.get("node-b").unwrap();
        assert_eq!(b.status, NodeStatus::Offline);
        assert!(b.last_error.is_some());
    }
}
