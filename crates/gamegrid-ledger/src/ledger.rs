//! ResourceLedger — reserve, release and reconcile node capacity.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gamegrid_state::*;

use crate::error::{LedgerError, LedgerResult};

/// Usage measured on a node by a probe.
///
/// Storage is not measured; it always follows committed reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeasuredUsage {
    pub cpu_millis: u64,
    pub ram_mb: u64,
}

/// Capacity ledger over the nodes in the [`StateStore`].
#[derive(Clone)]
pub struct ResourceLedger {
    state: StateStore,
}

impl ResourceLedger {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Commit `resources` on an online node.
    ///
    /// The availability check and the counter increment happen in one
    /// transaction; on any error nothing changes.
    pub fn reserve(
        &self,
        node_id: &str,
        resources: &ResourceVector,
        workload_id: Option<&str>,
    ) -> LedgerResult<Reservation> {
        let reservation = self
            .state
            .write(|txn| Self::reserve_in(txn, node_id, resources, workload_id))?;
        info!(
            reservation_id = %reservation.id,
            %node_id,
            cpu_millis = resources.cpu_millis,
            ram_mb = resources.ram_mb,
            storage_gb = resources.storage_gb,
            "capacity reserved"
        );
        Ok(reservation)
    }

    /// [`reserve`](Self::reserve) inside a caller-owned transaction.
    pub fn reserve_in(
        txn: &StoreTxn<'_>,
        node_id: &str,
        resources: &ResourceVector,
        workload_id: Option<&str>,
    ) -> LedgerResult<Reservation> {
        let mut node = txn
            .get_node(node_id)?
            .ok_or_else(|| LedgerError::NodeNotFound(node_id.to_string()))?;

        if node.status != NodeStatus::Online {
            return Err(LedgerError::NodeUnavailable {
                node_id: node_id.to_string(),
                status: node.status,
            });
        }
        if let Some(short) = node.capacity.shortfall(resources) {
            return Err(LedgerError::Insufficient {
                node_id: node_id.to_string(),
                kind: short.kind,
                requested: short.requested,
                available: short.available,
            });
        }

        for kind in ResourceKind::ALL {
            node.capacity.counter_mut(kind).used += resources.get(kind);
        }
        txn.put_node(&mut node)?;

        let reservation = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            workload_id: workload_id.map(str::to_string),
            resources: *resources,
            created_at: epoch_secs(),
        };
        txn.put_reservation(&reservation)?;
        Ok(reservation)
    }

    /// Return a reservation's capacity to its node.
    ///
    /// Idempotent: releasing an unknown or already released reservation is
    /// a no-op that returns `None`. Counters never go below zero.
    pub fn release(&self, reservation_id: &str) -> LedgerResult<Option<Reservation>> {
        let released = self
            .state
            .write(|txn| Self::release_in(txn, reservation_id))?;
        match &released {
            Some(r) => info!(%reservation_id, node_id = %r.node_id, "capacity released"),
            None => debug!(%reservation_id, "release of unknown reservation ignored"),
        }
        Ok(released)
    }

    /// [`release`](Self::release) inside a caller-owned transaction.
    pub fn release_in(txn: &StoreTxn<'_>, reservation_id: &str) -> LedgerResult<Option<Reservation>> {
        let Some(reservation) = txn.take_reservation(reservation_id)? else {
            return Ok(None);
        };
        if let Some(mut node) = txn.get_node(&reservation.node_id)? {
            node.capacity = subtract_used(node.capacity, &reservation.resources);
            txn.put_node(&mut node)?;
        }
        Ok(Some(reservation))
    }

    /// Sum of live reservations on a node.
    pub fn committed(&self, node_id: &str) -> LedgerResult<ResourceVector> {
        let reservations = self.state.list_reservations_for_node(node_id)?;
        Ok(sum_reservations(&reservations))
    }

    /// Apply a successful probe's measurement to a node.
    ///
    /// Each measured counter becomes `min(total, max(measured, committed))`;
    /// storage becomes `min(total, committed)`. The node is marked online
    /// unless it is in maintenance, its error is cleared and `last_seen`
    /// is refreshed.
    pub fn reconcile(&self, node_id: &str, measured: &MeasuredUsage) -> LedgerResult<Node> {
        let node = self.state.write(|txn| {
            let mut node = txn
                .get_node(node_id)?
                .ok_or_else(|| LedgerError::NodeNotFound(node_id.to_string()))?;
            let committed = sum_reservations(&txn.reservations_for_node(node_id)?);

            let cap = &mut node.capacity;
            cap.cpu.used = reconciled(cap.cpu.total, measured.cpu_millis, committed.cpu_millis);
            cap.ram.used = reconciled(cap.ram.total, measured.ram_mb, committed.ram_mb);
            cap.storage.used = reconciled(cap.storage.total, 0, committed.storage_gb);

            if node.status != NodeStatus::Maintenance {
                node.status = NodeStatus::Online;
            }
            node.last_error = None;
            node.last_seen = Some(epoch_secs());
            txn.put_node(&mut node)?;
            Ok::<_, LedgerError>(node)
        })?;

        debug!(
            %node_id,
            cpu_used = node.capacity.cpu.used,
            ram_used = node.capacity.ram.used,
            storage_used = node.capacity.storage.used,
            status = %node.status,
            "node usage reconciled"
        );
        Ok(node)
    }
}

fn reconciled(total: u64, measured: u64, committed: u64) -> u64 {
    measured.max(committed).min(total)
}

fn subtract_used(mut capacity: NodeCapacity, resources: &ResourceVector) -> NodeCapacity {
    for kind in ResourceKind::ALL {
        let counter = capacity.counter_mut(kind);
        counter.used = counter.used.saturating_sub(resources.get(kind));
    }
    capacity
}

fn sum_reservations(reservations: &[Reservation]) -> ResourceVector {
    reservations
        .iter()
        .fold(ResourceVector::ZERO, |acc, r| acc.saturating_add(&r.resources))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;
    use proptest::prelude::*;

    fn online_node(id: &str, totals: ResourceVector) -> Node {
        Node {
            id: id.to_string(),
            location: "eu-west".to_string(),
            coordinates: None,
            connection: ConnectionConfig {
                host: "10.0.0.1".to_string(),
                port: 2375,
                api_key: "key".to_string(),
            },
            capacity: NodeCapacity::with_totals(totals),
            status: NodeStatus::Online,
            last_seen: None,
            last_error: None,
            version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn setup(totals: ResourceVector) -> (StateStore, ResourceLedger) {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_node(&online_node("node-a", totals)).unwrap();
        let ledger = ResourceLedger::new(store.clone());
        (store, ledger)
    }

    #[test]
    fn reserve_increments_used_and_records_reservation() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));

        let r = ledger
            .reserve("node-a", &ResourceVector::from_cores(1, 2048, 10), Some("w1"))
            .unwrap();

        let node = store.get_node("node-a").unwrap().unwrap();
        assert_eq!(node.capacity.used(), ResourceVector::new(1000, 2048, 10));
        assert_eq!(node.version, 1);
        assert_eq!(store.get_reservation(&r.id).unwrap().unwrap().workload_id.as_deref(), Some("w1"));
    }

    #[test]
    fn reserve_exact_remaining_capacity_succeeds() {
        let (store, ledger) = setup(ResourceVector::from_cores(2, 4096, 50));
        ledger
            .reserve("node-a", &ResourceVector::from_cores(2, 4096, 50), None)
            .unwrap();

        let node = store.get_node("node-a").unwrap().unwrap();
        assert!(node.capacity.free().is_zero());
    }

    #[test]
    fn reserve_reports_first_short_resource() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 1024, 100));

        let err = ledger
            .reserve("node-a", &ResourceVector::from_cores(1, 2048, 10), None)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Insufficient { kind: ResourceKind::Ram, requested: 2048, available: 1024, .. }
        ));

        let node = store.get_node("node-a").unwrap().unwrap();
        assert!(node.capacity.used().is_zero());
        assert!(store.list_reservations_for_node("node-a").unwrap().is_empty());
    }

    #[test]
    fn reserve_requires_online_node() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let mut node = store.get_node("node-a").unwrap().unwrap();
        node.status = NodeStatus::Maintenance;
        store.put_node(&node).unwrap();

        let err = ledger.reserve("node-a", &ResourceVector::ZERO, None).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NodeUnavailable { status: NodeStatus::Maintenance, .. }
        ));
        assert!(matches!(
            ledger.reserve("ghost", &ResourceVector::ZERO, None),
            Err(LedgerError::NodeNotFound(_))
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let r = ledger
            .reserve("node-a", &ResourceVector::from_cores(1, 1024, 10), None)
            .unwrap();

        assert!(ledger.release(&r.id).unwrap().is_some());
        assert!(ledger.release(&r.id).unwrap().is_none());

        let node = store.get_node("node-a").unwrap().unwrap();
        assert!(node.capacity.used().is_zero());
    }

    #[test]
    fn release_clamps_at_zero() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let r = ledger
            .reserve("node-a", &ResourceVector::from_cores(2, 2048, 10), None)
            .unwrap();

        // A probe measured less than was reserved and an operator reset usage.
        let mut node = store.get_node("node-a").unwrap().unwrap();
        node.capacity.cpu.used = 500;
        store.put_node(&node).unwrap();

        ledger.release(&r.id).unwrap();
        let node = store.get_node("node-a").unwrap().unwrap();
        assert_eq!(node.capacity.cpu.used, 0);
        assert_eq!(node.capacity.ram.used, 0);
    }

    #[test]
    fn reconcile_never_erases_reservations() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        ledger
            .reserve("node-a", &ResourceVector::from_cores(2, 4096, 20), None)
            .unwrap();

        let node = ledger
            .reconcile("node-a", &MeasuredUsage { cpu_millis: 300, ram_mb: 6000 })
            .unwrap();

        assert_eq!(node.capacity.cpu.used, 2000);
        assert_eq!(node.capacity.ram.used, 6000);
        assert_eq!(node.capacity.storage.used, 20);
        assert!(node.last_seen.is_some());
        assert_eq!(store.get_node("node-a").unwrap().unwrap(), node);
    }

    #[test]
    fn reconcile_caps_measurement_at_total() {
        let (_store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let node = ledger
            .reconcile("node-a", &MeasuredUsage { cpu_millis: 9000, ram_mb: 100_000 })
            .unwrap();
        assert_eq!(node.capacity.cpu.used, 4000);
        assert_eq!(node.capacity.ram.used, 8192);
        assert!(node.capacity.is_consistent());
    }

    #[test]
    fn reconcile_brings_offline_node_online_but_keeps_maintenance() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let mut node = store.get_node("node-a").unwrap().unwrap();
        node.status = NodeStatus::Offline;
        node.last_error = Some("connection refused".into());
        store.put_node(&node).unwrap();

        let node = ledger.reconcile("node-a", &MeasuredUsage::default()).unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert!(node.last_error.is_none());

        let mut node = store.get_node("node-a").unwrap().unwrap();
        node.status = NodeStatus::Maintenance;
        store.put_node(&node).unwrap();
        let node = ledger.reconcile("node-a", &MeasuredUsage::default()).unwrap();
        assert_eq!(node.status, NodeStatus::Maintenance);
    }

    #[test]
    fn concurrent_reservations_never_oversell() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let request = ResourceVector::from_cores(1, 1024, 10);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.reserve("node-a", &request, None).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 4);
        let node = store.get_node("node-a").unwrap().unwrap();
        assert_eq!(node.capacity.cpu.used, 4000);
        assert!(node.capacity.is_consistent());
    }

    #[test]
    fn concurrent_reserve_and_release_stay_consistent() {
        let (store, ledger) = setup(ResourceVector::from_cores(4, 8192, 100));
        let request = ResourceVector::from_cores(1, 1024, 10);
        let held: Vec<String> = (0..4)
            .map(|_| ledger.reserve("node-a", &request, None).unwrap().id)
            .collect();

        let barrier = Arc::new(Barrier::new(12));
        let releases: Vec<_> = held
            .into_iter()
            .map(|id| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.release(&id).unwrap().is_some()
                })
            })
            .collect();
        let reserves: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.reserve("node-a", &request, None).is_ok()
                })
            })
            .collect();

        for h in releases {
            assert!(h.join().unwrap());
        }
        let granted = reserves
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count() as u64;

        assert!(granted <= 4);
        let node = store.get_node("node-a").unwrap().unwrap();
        assert!(node.capacity.is_consistent());
        assert_eq!(node.capacity.used(), ledger.committed("node-a").unwrap());
        assert_eq!(node.capacity.cpu.used, granted * 1000);
        assert_eq!(store.list_reservations_for_node("node-a").unwrap().len() as u64, granted);
    }

    #[derive(Debug, Clone)]
    enum LedgerOp {
        Reserve(u64, u64, u64),
        Release(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Vec<LedgerOp>> {
        proptest::collection::vec(
            prop_oneof![
                (0u64..3000, 0u64..5000, 0u64..60).prop_map(|(c, r, s)| LedgerOp::Reserve(c, r, s)),
                (0usize..16).prop_map(LedgerOp::Release),
            ],
            0..40,
        )
    }

    proptest! {
        #[test]
        fn property_used_tracks_live_reservations(ops in op_strategy()) {
            let totals = ResourceVector::from_cores(4, 8192, 100);
            let (store, ledger) = setup(totals);
            let mut issued: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    LedgerOp::Reserve(c, r, s) => {
                        if let Ok(res) = ledger.reserve("node-a", &ResourceVector::new(c, r, s), None) {
                            issued.push(res.id);
                        }
                    }
                    LedgerOp::Release(i) => {
                        if let Some(id) = issued.get(i % issued.len().max(1)) {
                            ledger.release(id).unwrap();
                        }
                    }
                }

                let node = store.get_node("node-a").unwrap().unwrap();
                prop_assert!(node.capacity.is_consistent());
                prop_assert_eq!(node.capacity.used(), ledger.committed("node-a").unwrap());
                prop_assert_eq!(node.capacity.totals(), totals);
            }
        }
    }
}
