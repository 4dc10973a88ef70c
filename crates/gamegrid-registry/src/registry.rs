//! NodeRegistry — validated CRUD and status transitions for nodes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gamegrid_state::*;

use crate::error::{RegistryError, RegistryResult};

/// How many times a compare-and-swap update is attempted before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Input for registering a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    /// Unique node name; becomes the node id.
    pub name: String,
    pub location: String,
    pub coordinates: Option<GeoPoint>,
    pub connection: ConnectionConfig,
    pub totals: ResourceVector,
}

/// Partial update of a node. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub location: Option<String>,
    /// `Some(None)` clears explicit coordinates.
    pub coordinates: Option<Option<GeoPoint>>,
    pub connection: Option<ConnectionConfig>,
    pub totals: Option<ResourceVector>,
}

/// Listing filter. Empty filter matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub location: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        self.status.is_none_or(|s| node.status == s)
            && self.location.as_deref().is_none_or(|l| node.location == l)
    }
}

/// Registry of nodes, persisted in the [`StateStore`].
#[derive(Clone)]
pub struct NodeRegistry {
    state: StateStore,
}

impl NodeRegistry {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Register a node. It starts `offline` until a probe succeeds.
    pub fn create(&self, new: NewNode) -> RegistryResult<Node> {
        validate_name(&new.name)?;
        validate_location(&new.location)?;
        if let Some(point) = &new.coordinates {
            validate_coordinates(point)?;
        }
        validate_connection(&new.connection)?;
        validate_totals(&new.totals)?;

        let now = epoch_secs();
        let node = Node {
            id: new.name,
            location: new.location,
            coordinates: new.coordinates,
            connection: new.connection,
            capacity: NodeCapacity::with_totals(new.totals),
            status: NodeStatus::Offline,
            last_seen: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        match self.state.insert_node(&node) {
            Ok(()) => {}
            Err(StateError::AlreadyExists(id)) => {
                return Err(RegistryError::Validation(format!(
                    "node name already in use: {id}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            node_id = %node.id,
            location = %node.location,
            address = %node.connection.address(),
            cpu_millis = node.capacity.cpu.total,
            ram_mb = node.capacity.ram.total,
            storage_gb = node.capacity.storage.total,
            "node registered"
        );
        Ok(node)
    }

    pub fn get(&self, node_id: &str) -> RegistryResult<Node> {
        self.state
            .get_node(node_id)?
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))
    }

    /// Nodes matching `filter`, ordered by id.
    pub fn list(&self, filter: &NodeFilter) -> RegistryResult<Vec<Node>> {
        let nodes = match filter.status {
            Some(status) => self.state.list_nodes_by_status(status)?,
            None => self.state.list_nodes()?,
        };
        Ok(nodes.into_iter().filter(|n| filter.matches(n)).collect())
    }

    /// Apply a partial update.
    ///
    /// Lowering a total below what is currently used is rejected.
    pub fn update(&self, node_id: &str, patch: &NodeUpdate) -> RegistryResult<Node> {
        if let Some(location) = &patch.location {
            validate_location(location)?;
        }
        if let Some(Some(point)) = &patch.coordinates {
            validate_coordinates(point)?;
        }
        if let Some(connection) = &patch.connection {
            validate_connection(connection)?;
        }
        if let Some(totals) = &patch.totals {
            validate_totals(totals)?;
        }

        let node = self.modify(node_id, |node| {
            if let Some(totals) = &patch.totals {
                for kind in ResourceKind::ALL {
                    let used = node.capacity.counter(kind).used;
                    let total = totals.get(kind);
                    if total < used {
                        return Err(RegistryError::Validation(format!(
                            "{kind} total {total} is below current usage {used}"
                        )));
                    }
                    node.capacity.counter_mut(kind).total = total;
                }
            }
            if let Some(location) = &patch.location {
                node.location = location.clone();
            }
            if let Some(coordinates) = patch.coordinates {
                node.coordinates = coordinates;
            }
            if let Some(connection) = &patch.connection {
                node.connection = connection.clone();
            }
            Ok(())
        })?;

        info!(%node_id, version = node.version, "node updated");
        Ok(node)
    }

    /// Remove a node. Fails with `Conflict` while any workload references it.
    pub fn delete(&self, node_id: &str) -> RegistryResult<()> {
        match self.state.delete_node_if_unreferenced(node_id)? {
            NodeDeletion::Deleted => {
                info!(%node_id, "node deleted");
                Ok(())
            }
            NodeDeletion::NotFound => Err(RegistryError::NotFound(node_id.to_string())),
            NodeDeletion::Referenced(workloads) => {
                warn!(%node_id, count = workloads.len(), "node delete refused, workloads assigned");
                Err(RegistryError::Conflict(format!(
                    "node {node_id} still hosts {} workload(s): {}",
                    workloads.len(),
                    workloads.join(", ")
                )))
            }
        }
    }

    /// Take a node out of placement. Probes keep it in maintenance.
    pub fn set_maintenance(&self, node_id: &str) -> RegistryResult<Node> {
        let node = self.modify(node_id, |node| {
            node.status = NodeStatus::Maintenance;
            Ok(())
        })?;
        info!(%node_id, "node entered maintenance");
        Ok(node)
    }

    /// Leave maintenance without going online (a failed bring-online).
    pub fn release_maintenance(&self, node_id: &str) -> RegistryResult<Node> {
        let node = self.modify(node_id, |node| {
            if node.status == NodeStatus::Maintenance {
                node.status = NodeStatus::Offline;
            }
            Ok(())
        })?;
        info!(%node_id, status = %node.status, "node left maintenance");
        Ok(node)
    }

    /// Mark a node online. Only called after a successful probe.
    pub fn mark_online(&self, node_id: &str) -> RegistryResult<Node> {
        let node = self.modify(node_id, |node| {
            node.status = NodeStatus::Online;
            node.last_error = None;
            Ok(())
        })?;
        info!(%node_id, "node online");
        Ok(node)
    }

    /// Record a failed probe.
    ///
    /// The node goes `offline` unless it is in maintenance; the recorded
    /// usage is left untouched.
    pub fn mark_offline(&self, node_id: &str, error: &str) -> RegistryResult<Node> {
        let mut was = NodeStatus::Offline;
        let node = self.modify(node_id, |node| {
            was = node.status;
            if node.status != NodeStatus::Maintenance {
                node.status = NodeStatus::Offline;
            }
            node.last_error = Some(error.to_string());
            Ok(())
        })?;
        if was == NodeStatus::Online {
            warn!(%node_id, %error, "node went offline");
        } else {
            debug!(%node_id, %error, status = %node.status, "probe failure recorded");
        }
        Ok(node)
    }

    /// Read-modify-write with compare-and-swap, retried on version conflict.
    fn modify(
        &self,
        node_id: &str,
        mut apply: impl FnMut(&mut Node) -> RegistryResult<()>,
    ) -> RegistryResult<Node> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut node = self.get(node_id)?;
            apply(&mut node)?;
            match self.state.compare_and_swap_node(&node) {
                Ok(stored) => return Ok(stored),
                Err(StateError::VersionConflict { expected, actual, .. }) => {
                    debug!(%node_id, attempt, expected, actual, "node version conflict, retrying");
                }
                Err(StateError::NotFound(_)) => {
                    return Err(RegistryError::NotFound(node_id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RegistryError::Conflict(format!(
            "node {node_id} changed concurrently {MAX_CAS_ATTEMPTS} times"
        )))
    }
}

// ── Validation ─────────────────────────────────────────────────────

fn validate_name(name: &str) -> RegistryResult<()> {
    if name.trim().is_empty() {
        return Err(RegistryError::Validation("name must not be empty".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(RegistryError::Validation(format!(
            "name may only contain letters, digits, '-', '_' and '.': {name}"
        )));
    }
    Ok(())
}

fn validate_location(location: &str) -> RegistryResult<()> {
    if location.trim().is_empty() {
        return Err(RegistryError::Validation("location must not be empty".into()));
    }
    Ok(())
}

fn validate_coordinates(point: &GeoPoint) -> RegistryResult<()> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lon) {
        return Err(RegistryError::Validation(format!(
            "coordinates out of range: {}, {}",
            point.lat, point.lon
        )));
    }
    Ok(())
}

fn validate_connection(connection: &ConnectionConfig) -> RegistryResult<()> {
    if connection.host.trim().is_empty() {
        return Err(RegistryError::Validation("host must not be empty".into()));
    }
    if connection.port == 0 {
        return Err(RegistryError::Validation("port must be in 1..=65535".into()));
    }
    if connection.api_key.is_empty() {
        return Err(RegistryError::Validation("api key must not be empty".into()));
    }
    Ok(())
}

fn validate_totals(totals: &ResourceVector) -> RegistryResult<()> {
    for kind in ResourceKind::ALL {
        if totals.get(kind) == 0 {
            return Err(RegistryError::Validation(format!(
                "{kind} total must be positive"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node(name: &str, location: &str) -> NewNode {
        NewNode {
            name: name.to_string(),
            location: location.to_string(),
            coordinates: None,
            connection: ConnectionConfig {
                host: "10.0.0.1".to_string(),
                port: 2375,
                api_key: "secret".to_string(),
            },
            totals: ResourceVector::from_cores(8, 16384, 500),
        }
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn create_starts_offline_with_nothing_used() {
        let registry = registry();
        let node = registry.create(new_node("node-a", "eu-west")).unwrap();

        assert_eq!(node.status, NodeStatus::Offline);
        assert!(node.capacity.used().is_zero());
        assert_eq!(node.capacity.cpu.total, 8000);
        assert_eq!(registry.get("node-a").unwrap(), node);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let registry = registry();
        registry.create(new_node("node-a", "eu-west")).unwrap();

        let err = registry.create(new_node("node-a", "us-east")).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn create_validates_input() {
        let registry = registry();

        let mut bad = new_node("", "eu-west");
        assert!(matches!(registry.create(bad.clone()), Err(RegistryError::Validation(_))));

        bad = new_node("node-a", " ");
        assert!(matches!(registry.create(bad), Err(RegistryError::Validation(_))));

        let mut bad = new_node("node-a", "eu-west");
        bad.totals.ram_mb = 0;
        assert!(matches!(registry.create(bad), Err(RegistryError::Validation(_))));

        let mut bad = new_node("node-a", "eu-west");
        bad.connection.port = 0;
        assert!(matches!(registry.create(bad), Err(RegistryError::Validation(_))));

        let mut bad = new_node("node-a", "eu-west");
        bad.coordinates = Some(GeoPoint { lat: 91.0, lon: 0.0 });
        assert!(matches!(registry.create(bad), Err(RegistryError::Validation(_))));

        assert!(registry.list(&NodeFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn list_filters_by_status_and_location() {
        let registry = registry();
        registry.create(new_node("node-a", "eu-west")).unwrap();
        registry.create(new_node("node-b", "us-east")).unwrap();
        registry.create(new_node("node-c", "eu-west")).unwrap();
        registry.mark_online("node-c").unwrap();

        let eu = registry
            .list(&NodeFilter {
                location: Some("eu-west".into()),
                ..NodeFilter::default()
            })
            .unwrap();
        assert_eq!(eu.len(), 2);

        let online_eu = registry
            .list(&NodeFilter {
                status: Some(NodeStatus::Online),
                location: Some("eu-west".into()),
            })
            .unwrap();
        assert_eq!(online_eu.len(), 1);
        assert_eq!(online_eu[0].id, "node-c");
    }

    #[test]
    fn update_patches_fields_and_bumps_version() {
        let registry = registry();
        registry.create(new_node("node-a", "eu-west")).unwrap();

        let updated = registry
            .update(
                "node-a",
                &NodeUpdate {
                    location: Some("eu-central".into()),
                    coordinates: Some(Some(GeoPoint { lat: 50.1, lon: 8.7 })),
                    totals: Some(ResourceVector::from_cores(16, 32768, 1000)),
                    ..NodeUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(updated.location, "eu-central");
        assert_eq!(updated.capacity.cpu.total, 16000);
        assert_eq!(updated.version, 1);
        assert_eq!(updated.connection.host, "10.0.0.1");
    }

    #[test]
    fn update_rejects_total_below_used() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = NodeRegistry::new(store.clone());
        registry.create(new_node("node-a", "eu-west")).unwrap();

        let mut node = store.get_node("node-a").unwrap().unwrap();
        node.capacity.ram.used = 8000;
        store.put_node(&node).unwrap();

        let err = registry
            .update(
                "node-a",
                &NodeUpdate {
                    totals: Some(ResourceVector::from_cores(8, 4096, 500)),
                    ..NodeUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(msg) if msg.contains("ram")));
        assert_eq!(registry.get("node-a").unwrap().capacity.ram.total, 16384);
    }

    #[test]
    fn update_missing_node_is_not_found() {
        let registry = registry();
        let err = registry.update("ghost", &NodeUpdate::default()).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn delete_refused_while_workloads_assigned() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = NodeRegistry::new(store.clone());
        registry.create(new_node("node-a", "eu-west")).unwrap();

        store
            .put_workload(&Workload {
                id: "w1".into(),
                name: "srv".into(),
                owner: "user".into(),
                kind: WorkloadKind::Valheim,
                resources: ResourceVector::from_cores(1, 1024, 5),
                max_players: None,
                auto_restart: false,
                node_id: Some("node-a".into()),
                reservation_id: None,
                status: WorkloadStatus::Stopped,
                runtime_handle: None,
                error: None,
                last_started: None,
                last_stopped: None,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();

        assert!(matches!(registry.delete("node-a"), Err(RegistryError::Conflict(_))));
        assert!(registry.get("node-a").is_ok());

        store.delete_workload("w1").unwrap();
        registry.delete("node-a").unwrap();
        assert!(matches!(registry.delete("node-a"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn maintenance_survives_probe_failure() {
        let registry = registry();
        registry.create(new_node("node-a", "eu-west")).unwrap();
        registry.set_maintenance("node-a").unwrap();

        let node = registry.mark_offline("node-a", "connection refused").unwrap();
        assert_eq!(node.status, NodeStatus::Maintenance);
        assert_eq!(node.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn online_node_goes_offline_and_back() {
        let registry = registry();
        registry.create(new_node("node-a", "eu-west")).unwrap();

        registry.mark_online("node-a").unwrap();
        let node = registry.mark_offline("node-a", "timeout").unwrap();
        assert_eq!(node.status, NodeStatus::Offline);

        let node = registry.mark_online("node-a").unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert!(node.last_error.is_none());
    }
}
