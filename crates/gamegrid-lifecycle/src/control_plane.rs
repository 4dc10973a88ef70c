//! ControlPlane — the caller-facing operations.
//!
//! A thin facade over the registry, prober, placement engine and workload
//! controller. Every failure comes back as a [`ControlPlaneError`] whose
//! [`kind`](ControlPlaneError::kind) the calling layer maps to its own
//! responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gamegrid_health::{HealthProber, HealthReport};
use gamegrid_placement::{LocationHint, PlacementDecision, PlacementEngine, PlacementRequest, PlacementStrategy};
use gamegrid_registry::{NewNode, NodeFilter, NodeRegistry, NodeUpdate};
use gamegrid_state::{Node, Workload};

use crate::controller::{WorkloadController, WorkloadSpec, WorkloadStats};
use crate::error::{ControlPlaneResult, LifecycleError};

/// A control action on an existing workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Delete,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for ControlAction {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            "delete" => Ok(ControlAction::Delete),
            other => Err(LifecycleError::Validation(format!("unknown action: {other}"))),
        }
    }
}

/// A node as written plus the report of its initial probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node: Node,
    pub probe: HealthReport,
}

#[derive(Clone)]
pub struct ControlPlane {
    registry: NodeRegistry,
    prober: HealthProber,
    placement: PlacementEngine,
    workloads: WorkloadController,
}

impl ControlPlane {
    pub fn new(
        registry: NodeRegistry,
        prober: HealthProber,
        placement: PlacementEngine,
        workloads: WorkloadController,
    ) -> Self {
        Self {
            registry,
            prober,
            placement,
            workloads,
        }
    }

    pub fn workloads(&self) -> &WorkloadController {
        &self.workloads
    }

    // ── Placement and workloads ────────────────────────────────────

    /// Choose a node without reserving anything.
    pub fn place_workload(
        &self,
        request: &PlacementRequest,
    ) -> ControlPlaneResult<PlacementDecision> {
        Ok(self.placement.place(request)?)
    }

    pub async fn create_workload(&self, spec: WorkloadSpec) -> ControlPlaneResult<Workload> {
        Ok(self.workloads.create(spec).await?)
    }

    /// Apply `action`. Returns the updated workload, or `None` once deleted.
    pub async fn control_workload(
        &self,
        workload_id: &str,
        action: ControlAction,
    ) -> ControlPlaneResult<Option<Workload>> {
        let workload = match action {
            ControlAction::Start => Some(self.workloads.start(workload_id).await?),
            ControlAction::Stop => Some(self.workloads.stop(workload_id).await?),
            ControlAction::Restart => Some(self.workloads.restart(workload_id).await?),
            ControlAction::Delete => {
                self.workloads.delete(workload_id).await?;
                None
            }
        };
        Ok(workload)
    }

    pub async fn reprovision(
        &self,
        workload_id: &str,
        strategy: Option<PlacementStrategy>,
        hint: Option<LocationHint>,
    ) -> ControlPlaneResult<Workload> {
        Ok(self.workloads.reprovision(workload_id, strategy, hint).await?)
    }

    /// Roll back workloads an earlier process left mid-provisioning.
    pub async fn recover_interrupted(&self) -> ControlPlaneResult<Vec<Workload>> {
        Ok(self.workloads.recover_interrupted().await?)
    }

    pub fn get_workload(&self, workload_id: &str) -> ControlPlaneResult<Workload> {
        Ok(self.workloads.get(workload_id)?)
    }

    pub fn list_workloads(&self) -> ControlPlaneResult<Vec<Workload>> {
        Ok(self.workloads.list()?)
    }

    pub async fn workload_logs(&self, workload_id: &str, tail: Option<usize>) -> ControlPlaneResult<String> {
        Ok(self.workloads.logs(workload_id, tail).await?)
    }

    pub async fn workload_stats(&self, workload_id: &str) -> ControlPlaneResult<WorkloadStats> {
        Ok(self.workloads.stats(workload_id).await?)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub async fn probe_node(&self, node_id: &str) -> ControlPlaneResult<HealthReport> {
        Ok(self.prober.probe(node_id).await?)
    }

    pub async fn probe_all(&self) -> ControlPlaneResult<Vec<HealthReport>> {
        Ok(self.prober.probe_all().await?)
    }

    pub fn list_nodes(&self, filter: &NodeFilter) -> ControlPlaneResult<Vec<Node>> {
        Ok(self.registry.list(filter)?)
    }

    pub fn get_node(&self, node_id: &str) -> ControlPlaneResult<Node> {
        Ok(self.registry.get(node_id)?)
    }

    /// Register a node and probe it once.
    ///
    /// An unreachable node is kept (offline); the failed report is
    /// returned alongside it.
    pub async fn register_node(&self, new: NewNode) -> ControlPlaneResult<NodeRegistration> {
        let node = self.registry.create(new)?;
        self.initial_probe(&node.id).await
    }

    /// Update a node and probe it once with the new settings.
    pub async fn update_node(&self, node_id: &str, patch: &NodeUpdate) -> ControlPlaneResult<NodeRegistration> {
        self.registry.update(node_id, patch)?;
        self.initial_probe(node_id).await
    }

    pub fn delete_node(&self, node_id: &str) -> ControlPlaneResult<()> {
        Ok(self.registry.delete(node_id)?)
    }

    pub fn set_maintenance(&self, node_id: &str) -> ControlPlaneResult<Node> {
        Ok(self.registry.set_maintenance(node_id)?)
    }

    /// Probe and go online only if the node answers.
    pub async fn bring_online(&self, node_id: &str) -> ControlPlaneResult<HealthReport> {
        Ok(self.prober.bring_online(node_id).await?)
    }

    async fn initial_probe(&self, node_id: &str) -> ControlPlaneResult<NodeRegistration> {
        let probe = self.prober.probe(node_id).await?;
        if probe.is_reachable() {
            info!(%node_id, status = %probe.status, "node reachable");
        } else {
            warn!(
                %node_id,
                outcome = ?probe.outcome,
                error = probe.error.as_deref().unwrap_or_default(),
                "node registered but not reachable"
            );
        }
        let node = self.registry.get(node_id)?;
        Ok(NodeRegistration { node, probe })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use gamegrid_ledger::ResourceLedger;
    use gamegrid_placement::LocationTable;
    use gamegrid_runtime::InMemoryRuntime;
    use gamegrid_state::{ConnectionConfig, NodeStatus, ResourceVector, StateStore};

    use crate::catalog::WorkloadCatalog;
    use crate::error::ErrorKind;

    fn plane() -> (Arc<InMemoryRuntime>, ControlPlane) {
        let state = StateStore::open_in_memory().unwrap();
        let registry = NodeRegistry::new(state.clone());
        let runtime = Arc::new(InMemoryRuntime::new());
        let prober = HealthProber::new(registry.clone(), ResourceLedger::new(state.clone()), runtime.clone());
        let placement = PlacementEngine::new(state.clone(), LocationTable::new());
        let controller = WorkloadController::new(
            state,
            registry.clone(),
            placement.clone(),
            prober.clone(),
            runtime.clone(),
            Arc::new(WorkloadCatalog::builtin()),
        );
        (runtime, ControlPlane::new(registry, prober, placement, controller))
    }

    fn new_node(name: &str) -> NewNode {
        NewNode {
            name: name.to_string(),
            location: "us-east".to_string(),
            coordinates: None,
            connection: ConnectionConfig {
                host: format!("{name}.internal"),
                port: 2375,
                api_key: "key".to_string(),
            },
            totals: ResourceVector::from_cores(4, 8192, 100),
        }
    }

    #[test]
    fn actions_parse() {
        assert_eq!("restart".parse::<ControlAction>().unwrap(), ControlAction::Restart);
        assert_eq!(ControlAction::Delete.to_string(), "delete");
        assert!("pause".parse::<ControlAction>().is_err());
    }

    #[tokio::test]
    async fn register_probes_node_online() {
        let (_, plane) = plane();
        let reg = plane.register_node(new_node("node-a")).await.unwrap();
        assert!(reg.probe.is_reachable());
        assert_eq!(reg.node.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn unreachable_registration_is_kept_offline() {
        let (runtime, plane) = plane();
        runtime.set_unreachable("node-b.internal:2375", true);

        let reg = plane.register_node(new_node("node-b")).await.unwrap();
        assert!(!reg.probe.is_reachable());
        assert_eq!(reg.node.status, NodeStatus::Offline);
        assert!(reg.node.last_error.is_some());
        assert_eq!(plane.list_nodes(&NodeFilter::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_reprobes_with_new_connection() {
        let (runtime, plane) = plane();
        runtime.set_unreachable("node-a.internal:2375", true);
        plane.register_node(new_node("node-a")).await.unwrap();

        let patch = NodeUpdate {
            connection: Some(ConnectionConfig {
                host: "10.0.0.7".to_string(),
                port: 2375,
                api_key: "key".to_string(),
            }),
            ..NodeUpdate::default()
        };
        let reg = plane.update_node("node-a", &patch).await.unwrap();
        assert!(reg.probe.is_reachable());
        assert_eq!(reg.node.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn errors_carry_kinds() {
        let (_, plane) = plane();

        let err = plane.place_workload(&PlacementRequest::new(
            ResourceVector::from_cores(1, 512, 1),
            PlacementStrategy::LeastLoaded,
        ));
        assert_eq!(err.unwrap_err().kind(), ErrorKind::NoSuitableNode);

        let err = plane.control_workload("missing", ControlAction::Start).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut bad = new_node("node-c");
        bad.connection.port = 0;
        let err = plane.register_node(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn control_workload_delete_returns_none() {
        let (_, plane) = plane();
        plane.register_node(new_node("node-a")).await.unwrap();
        let w = plane
            .create_workload(WorkloadSpec {
                name: "lan-party".into(),
                owner: "user-2".into(),
                kind: "csgo".into(),
                resources: ResourceVector::from_cores(1, 2048, 15),
                max_players: Some(10),
                auto_restart: true,
                strategy: None,
                hint: None,
            })
            .await
            .unwrap();

        let stopped = plane.control_workload(&w.id, ControlAction::Stop).await.unwrap();
        assert_eq!(stopped.map(|w| w.status), Some(gamegrid_state::WorkloadStatus::Stopped));

        assert!(plane.control_workload(&w.id, ControlAction::Delete).await.unwrap().is_none());
        assert!(plane.list_workloads().unwrap().is_empty());
        plane.delete_node("node-a").unwrap();
    }
}
