//! PlacementEngine — filter candidates and apply a strategy.

use std::cmp::Ordering;

use tracing::{debug, warn};

use gamegrid_state::*;

use crate::error::{PlacementError, PlacementResult};
use crate::geo::{LocationTable, haversine_km};
use crate::load::{LoadWeights, weighted_load};
use crate::strategy::*;

/// Selects nodes for placement requests.
#[derive(Clone)]
pub struct PlacementEngine {
    state: StateStore,
    locations: LocationTable,
    weights: LoadWeights,
}

impl PlacementEngine {
    pub fn new(state: StateStore, locations: LocationTable) -> Self {
        Self {
            state,
            locations,
            weights: LoadWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: LoadWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    /// Choose a node for `request`. Does not reserve capacity.
    pub fn place(&self, request: &PlacementRequest) -> PlacementResult<PlacementDecision> {
        let decision = match request.strategy {
            PlacementStrategy::RoundRobin => self.place_round_robin(request)?,
            PlacementStrategy::LeastLoaded => {
                let online = self.state.list_nodes_by_status(NodeStatus::Online)?;
                let candidates = candidates(&online, &request.resources, request)?;
                self.least_loaded(&candidates, request.strategy, None)
            }
            PlacementStrategy::LocationBased => {
                let online = self.state.list_nodes_by_status(NodeStatus::Online)?;
                let candidates = candidates(&online, &request.resources, request)?;
                self.location_based(&candidates, request)
            }
        };

        debug!(
            node_id = %decision.node_id,
            requested = %decision.requested,
            applied = %decision.applied,
            load = decision.load,
            "placement decided"
        );
        Ok(decision)
    }

    /// Online nodes that can fit `resources`, ordered by id.
    pub fn candidates(&self, resources: &ResourceVector) -> PlacementResult<Vec<Node>> {
        let online = self.state.list_nodes_by_status(NodeStatus::Online)?;
        Ok(online.into_iter().filter(|n| n.capacity.fits(resources)).collect())
    }

    /// Cursor read, selection and cursor advance in one transaction, so
    /// concurrent callers never pick from the same cursor position.
    fn place_round_robin(&self, request: &PlacementRequest) -> PlacementResult<PlacementDecision> {
        let key = request.cursor_key();
        self.state.write(|txn| {
            let online: Vec<Node> = txn
                .nodes()?
                .into_iter()
                .filter(|n| n.status == NodeStatus::Online)
                .collect();
            let candidates = candidates(&online, &request.resources, request)?;

            let last = txn.get_cursor(&key)?;
            let chosen = match last.as_deref() {
                Some(last) => candidates
                    .iter()
                    .find(|n| n.id.as_str() > last)
                    .unwrap_or(&candidates[0]),
                None => &candidates[0],
            };
            txn.put_cursor(&key, &chosen.id)?;
            debug!(cursor = %key, previous = ?last, next = %chosen.id, "round-robin cursor advanced");

            Ok(PlacementDecision {
                node_id: chosen.id.clone(),
                requested: request.strategy,
                applied: PlacementStrategy::RoundRobin,
                fallback: None,
                load: weighted_load(&chosen.capacity, &self.weights),
                distance_km: None,
            })
        })
    }

    fn least_loaded(
        &self,
        candidates: &[&Node],
        requested: PlacementStrategy,
        fallback: Option<PlacementFallback>,
    ) -> PlacementDecision {
        let (load, node) = candidates
            .iter()
            .map(|n| (weighted_load(&n.capacity, &self.weights), *n))
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)))
            .map(|(load, node)| (load, node.id.clone()))
            .unwrap_or_default();

        PlacementDecision {
            node_id: node,
            requested,
            applied: PlacementStrategy::LeastLoaded,
            fallback,
            load,
            distance_km: None,
        }
    }

    fn location_based(&self, candidates: &[&Node], request: &PlacementRequest) -> PlacementDecision {
        let target = match &request.hint {
            None => Err(PlacementFallback::MissingHint),
            Some(LocationHint::Point(point)) => Ok(*point),
            Some(LocationHint::Label(label)) => self
                .locations
                .resolve(label)
                .ok_or_else(|| PlacementFallback::UnknownLocation(label.clone())),
        };

        let target = match target {
            Ok(point) => point,
            Err(fallback) => {
                warn!(reason = %fallback, "location-based placement fell back to least-loaded");
                return self.least_loaded(candidates, request.strategy, Some(fallback));
            }
        };

        // Located nodes by distance, then unlocated nodes; ties by id.
        let (distance, node) = candidates
            .iter()
            .map(|n| (self.locations.locate(n).map(|p| haversine_km(&target, &p)), *n))
            .min_by(|a, b| compare_distance(a.0, b.0).then_with(|| a.1.id.cmp(&b.1.id)))
            .map(|(d, n)| (d, n.clone()))
            .unwrap_or_else(|| (None, candidates[0].clone()));

        PlacementDecision {
            load: weighted_load(&node.capacity, &self.weights),
            node_id: node.id,
            requested: request.strategy,
            applied: PlacementStrategy::LocationBased,
            fallback: None,
            distance_km: distance,
        }
    }
}

/// Filter `online` to nodes fitting `resources`; empty is `NoSuitableNode`.
fn candidates<'a>(
    online: &'a [Node],
    resources: &ResourceVector,
    request: &PlacementRequest,
) -> PlacementResult<Vec<&'a Node>> {
    let fitting: Vec<&Node> = online.iter().filter(|n| n.capacity.fits(resources)).collect();
    if fitting.is_empty() {
        debug!(online = online.len(), strategy = %request.strategy, "no node fits request");
        return Err(PlacementError::NoSuitableNode {
            requested: *resources,
            online: online.len(),
        });
    }
    Ok(fitting)
}

fn compare_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRANKFURT: GeoPoint = GeoPoint { lat: 50.11, lon: 8.68 };
    const NEW_YORK: GeoPoint = GeoPoint { lat: 40.71, lon: -74.01 };
    const TOKYO: GeoPoint = GeoPoint { lat: 35.68, lon: 139.69 };

    fn node(id: &str, load: f64) -> Node {
        let mut capacity = NodeCapacity::with_totals(ResourceVector::new(1000, 1000, 1000));
        let used = (load * 1000.0).round() as u64;
        capacity.cpu.used = used;
        capacity.ram.used = used;
        capacity.storage.used = used;
        Node {
            id: id.to_string(),
            location: "unknown".to_string(),
            coordinates: None,
            connection: ConnectionConfig {
                host: "10.0.0.1".to_string(),
                port: 2375,
                api_key: "key".to_string(),
            },
            capacity,
            status: NodeStatus::Online,
            last_seen: None,
            last_error: None,
            version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn engine_with(nodes: &[Node]) -> (StateStore, PlacementEngine) {
        let store = StateStore::open_in_memory().unwrap();
        for n in nodes {
            store.insert_node(n).unwrap();
        }
        let mut locations = LocationTable::new();
        locations.insert("eu-central", FRANKFURT);
        locations.insert("us-east", NEW_YORK);
        locations.insert("ap-northeast", TOKYO);
        let engine = PlacementEngine::new(store.clone(), locations);
        (store, engine)
    }

    fn small() -> ResourceVector {
        ResourceVector::new(10, 10, 10)
    }

    #[test]
    fn least_loaded_picks_lowest_load() {
        let (_, engine) = engine_with(&[node("a", 0.9), node("b", 0.3), node("c", 0.6)]);
        let decision = engine
            .place(&PlacementRequest::new(small(), PlacementStrategy::LeastLoaded))
            .unwrap();
        assert_eq!(decision.node_id, "b");
        assert!((decision.load - 0.3).abs() < 1e-9);
    }

    #[test]
    fn least_loaded_tie_breaks_on_lowest_id() {
        let (_, engine) = engine_with(&[node("c", 0.5), node("b", 0.5), node("d", 0.7)]);
        let request = PlacementRequest::new(small(), PlacementStrategy::LeastLoaded);
        for _ in 0..10 {
            assert_eq!(engine.place(&request).unwrap().node_id, "b");
        }
    }

    #[test]
    fn offline_and_maintenance_nodes_are_excluded() {
        let mut offline = node("a", 0.0);
        offline.status = NodeStatus::Offline;
        let mut maintenance = node("b", 0.0);
        maintenance.status = NodeStatus::Maintenance;
        let (_, engine) = engine_with(&[offline, maintenance, node("c", 0.8)]);

        let decision = engine
            .place(&PlacementRequest::new(small(), PlacementStrategy::LeastLoaded))
            .unwrap();
        assert_eq!(decision.node_id, "c");
    }

    #[test]
    fn nodes_without_room_are_excluded() {
        let (_, engine) = engine_with(&[node("a", 0.0), node("b", 0.95)]);
        let request = PlacementRequest::new(ResourceVector::new(100, 100, 100), PlacementStrategy::RoundRobin);
        for _ in 0..3 {
            assert_eq!(engine.place(&request).unwrap().node_id, "a");
        }
    }

    #[test]
    fn no_candidates_is_no_suitable_node() {
        let mut offline = node("a", 0.0);
        offline.status = NodeStatus::Offline;
        let (_, engine) = engine_with(&[offline, node("b", 0.995)]);

        let err = engine
            .place(&PlacementRequest::new(small(), PlacementStrategy::LeastLoaded))
            .unwrap_err();
        assert!(matches!(err, PlacementError::NoSuitableNode { online: 1, .. }));

        let (_, empty) = engine_with(&[]);
        let err = empty
            .place(&PlacementRequest::new(small(), PlacementStrategy::RoundRobin))
            .unwrap_err();
        assert!(matches!(err, PlacementError::NoSuitableNode { online: 0, .. }));
    }

    #[test]
    fn round_robin_cycles_in_id_order() {
        let (_, engine) = engine_with(&[node("c", 0.0), node("a", 0.0), node("b", 0.0)]);
        let request = PlacementRequest::new(small(), PlacementStrategy::RoundRobin);

        let picks: Vec<_> = (0..5)
            .map(|_| engine.place(&request).unwrap().node_id)
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn round_robin_cursor_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let request = PlacementRequest::new(small(), PlacementStrategy::RoundRobin);

        {
            let store = StateStore::open(&path).unwrap();
            store.insert_node(&node("a", 0.0)).unwrap();
            store.insert_node(&node("b", 0.0)).unwrap();
            let engine = PlacementEngine::new(store, LocationTable::new());
            assert_eq!(engine.place(&request).unwrap().node_id, "a");
        }

        let store = StateStore::open(&path).unwrap();
        let engine = PlacementEngine::new(store, LocationTable::new());
        assert_eq!(engine.place(&request).unwrap().node_id, "b");
    }

    #[test]
    fn round_robin_cursors_are_per_resource_class() {
        let (store, engine) = engine_with(&[node("a", 0.0), node("b", 0.0)]);
        let mc = PlacementRequest::new(small(), PlacementStrategy::RoundRobin).with_resource_class("minecraft");
        let vh = PlacementRequest::new(small(), PlacementStrategy::RoundRobin).with_resource_class("valheim");

        assert_eq!(engine.place(&mc).unwrap().node_id, "a");
        assert_eq!(engine.place(&mc).unwrap().node_id, "b");
        assert_eq!(engine.place(&vh).unwrap().node_id, "a");
        assert_eq!(store.get_cursor("round_robin:minecraft").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn round_robin_skips_removed_cursor_node() {
        let (store, engine) = engine_with(&[node("a", 0.0), node("b", 0.0), node("c", 0.0)]);
        store.write(|txn| txn.put_cursor("round_robin:any", "b")).unwrap();
        let mut b = store.get_node("b").unwrap().unwrap();
        b.status = NodeStatus::Offline;
        store.put_node(&b).unwrap();

        let request = PlacementRequest::new(small(), PlacementStrategy::RoundRobin);
        assert_eq!(engine.place(&request).unwrap().node_id, "c");
        assert_eq!(engine.place(&request).unwrap().node_id, "a");
    }

    #[test]
    fn location_based_picks_nearest() {
        let mut fra = node("fra", 0.9);
        fra.location = "eu-central".into();
        let mut nyc = node("nyc", 0.1);
        nyc.location = "us-east".into();
        let mut tyo = node("tyo", 0.1);
        tyo.coordinates = Some(TOKYO);
        let (_, engine) = engine_with(&[fra, nyc, tyo]);

        let near_london = PlacementRequest::new(small(), PlacementStrategy::LocationBased)
            .with_hint(LocationHint::Point(GeoPoint { lat: 51.5, lon: -0.1 }));
        let decision = engine.place(&near_london).unwrap();
        assert_eq!(decision.node_id, "fra");
        assert_eq!(decision.applied, PlacementStrategy::LocationBased);
        assert!(decision.fallback.is_none());
        assert!(decision.distance_km.unwrap() < 700.0);

        let by_label = PlacementRequest::new(small(), PlacementStrategy::LocationBased)
            .with_hint(LocationHint::Label("ap-northeast".into()));
        assert_eq!(engine.place(&by_label).unwrap().node_id, "tyo");
    }

    #[test]
    fn location_based_ranks_unlocated_nodes_last() {
        let unlocated = node("a", 0.0);
        let mut far = node("z", 0.5);
        far.coordinates = Some(TOKYO);
        let (_, engine) = engine_with(&[unlocated, far]);

        let request = PlacementRequest::new(small(), PlacementStrategy::LocationBased)
            .with_hint(LocationHint::Point(NEW_YORK));
        assert_eq!(engine.place(&request).unwrap().node_id, "z");
    }

    #[test]
    fn location_based_without_hint_falls_back() {
        let (_, engine) = engine_with(&[node("a", 0.9), node("b", 0.3), node("c", 0.6)]);

        let decision = engine
            .place(&PlacementRequest::new(small(), PlacementStrategy::LocationBased))
            .unwrap();
        assert_eq!(decision.node_id, "b");
        assert_eq!(decision.requested, PlacementStrategy::LocationBased);
        assert_eq!(decision.applied, PlacementStrategy::LeastLoaded);
        assert_eq!(decision.fallback, Some(PlacementFallback::MissingHint));
    }

    proptest::proptest! {
        #[test]
        fn property_placement_then_reserve_never_oversells(
            loads in proptest::collection::vec(0u64..1000, 1..6),
            requests in proptest::collection::vec((1u64..400, 1u64..400, 1u64..400, 0usize..3), 1..30),
        ) {
            use gamegrid_ledger::ResourceLedger;

            let nodes: Vec<Node> = loads
                .iter()
                .enumerate()
                .map(|(i, used)| {
                    let mut n = node(&format!("n{i}"), 0.0);
                    n.capacity.cpu.used = *used;
                    n
                })
                .collect();
            let (store, engine) = engine_with(&nodes);
            let ledger = ResourceLedger::new(store.clone());

            for (cpu, ram, storage, s) in requests {
                let strategy = [
                    PlacementStrategy::RoundRobin,
                    PlacementStrategy::LeastLoaded,
                    PlacementStrategy::LocationBased,
                ][s];
                let resources = ResourceVector::new(cpu, ram, storage);
                let Ok(decision) = engine.place(&PlacementRequest::new(resources, strategy)) else {
                    continue;
                };
                proptest::prop_assert!(ledger.reserve(&decision.node_id, &resources, None).is_ok());
                let chosen = store.get_node(&decision.node_id).unwrap().unwrap();
                proptest::prop_assert!(chosen.capacity.is_consistent());
            }
        }
    }

    #[test]
    fn location_based_with_unknown_label_falls_back() {
        let (_, engine) = engine_with(&[node("a", 0.9), node("b", 0.3)]);

        let request = PlacementRequest::new(small(), PlacementStrategy::LocationBased)
            .with_hint(LocationHint::Label("atlantis".into()));
        let decision = engine.place(&request).unwrap();
        assert_eq!(decision.node_id, "b");
        assert_eq!(
            decision.fallback,
            Some(PlacementFallback::UnknownLocation("atlantis".into()))
        );
    }
}
