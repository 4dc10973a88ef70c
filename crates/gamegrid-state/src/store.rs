//! StateStore — redb-backed state persistence for GameGrid.
//!
//! Provides typed CRUD operations over nodes, workloads, reservations and
//! placement cursors. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).
//!
//! redb serializes write transactions, so a read-check-write sequence run
//! inside [`StateStore::write`] is indivisible with respect to every other
//! writer of the same database.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Outcome of [`StateStore::delete_node_if_unreferenced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDeletion {
    Deleted,
    NotFound,
    /// The node still hosts these workloads and was left in place.
    Referenced(Vec<WorkloadId>),
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        txn.open_table(CURSORS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single write transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; on `Err` every
    /// write made through the [`StoreTxn`] is discarded.
    pub fn write<T, E>(&self, f: impl FnOnce(&StoreTxn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = f(&StoreTxn { txn: &txn });
        match outcome {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    debug!(error = %abort_err, "write transaction abort failed");
                }
                Err(e)
            }
        }
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        keep: impl Fn(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert a new node. Fails with `AlreadyExists` if the id is taken.
    pub fn insert_node(&self, node: &Node) -> StateResult<()> {
        self.write(|txn| {
            if txn.get_node(&node.id)?.is_some() {
                return Err(StateError::AlreadyExists(node.id.clone()));
            }
            txn.write_json(NODES, &node.id, node)
        })?;
        debug!(node_id = %node.id, "node inserted");
        Ok(())
    }

    /// Insert or overwrite a node record verbatim (no version bump).
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        self.write(|txn| txn.write_json(NODES, &node.id, node))
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.get_json(NODES, node_id)
    }

    /// List all nodes, ordered by id.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list_json(NODES, |_: &Node| true)
    }

    /// List nodes with the given status, ordered by id.
    pub fn list_nodes_by_status(&self, status: NodeStatus) -> StateResult<Vec<Node>> {
        self.list_json(NODES, |n: &Node| n.status == status)
    }

    /// Write `node` only if the stored version still equals `node.version`.
    ///
    /// Returns the stored record with its bumped version.
    pub fn compare_and_swap_node(&self, node: &Node) -> StateResult<Node> {
        self.write(|txn| {
            let current = txn
                .get_node(&node.id)?
                .ok_or_else(|| StateError::NotFound(node.id.clone()))?;
            if current.version != node.version {
                return Err(StateError::VersionConflict {
                    id: node.id.clone(),
                    expected: node.version,
                    actual: current.version,
                });
            }
            let mut next = node.clone();
            txn.put_node(&mut next)?;
            Ok(next)
        })
    }

    /// Delete a node unless a workload still references it.
    ///
    /// The reference check and the delete run in the same transaction.
    pub fn delete_node_if_unreferenced(&self, node_id: &str) -> StateResult<NodeDeletion> {
        let outcome = self.write(|txn| {
            if txn.get_node(node_id)?.is_none() {
                return Ok(NodeDeletion::NotFound);
            }
            let referencing: Vec<WorkloadId> = txn
                .workloads_for_node(node_id)?
                .into_iter()
                .map(|w| w.id)
                .collect();
            if !referencing.is_empty() {
                return Ok(NodeDeletion::Referenced(referencing));
            }
            txn.remove(NODES, node_id)?;
            Ok(NodeDeletion::Deleted)
        })?;
        debug!(%node_id, ?outcome, "node delete attempted");
        Ok(outcome)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        self.write(|txn| txn.put_workload(workload))
    }

    /// Get a workload by ID.
    pub fn get_workload(&self, workload_id: &str) -> StateResult<Option<Workload>> {
        self.get_json(WORKLOADS, workload_id)
    }

    /// List all workloads.
    pub fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.list_json(WORKLOADS, |_: &Workload| true)
    }

    /// List workloads assigned to a node.
    pub fn list_workloads_for_node(&self, node_id: &str) -> StateResult<Vec<Workload>> {
        self.list_json(WORKLOADS, |w: &Workload| w.node_id.as_deref() == Some(node_id))
    }

    /// Delete a workload by ID. Returns true if it existed.
    pub fn delete_workload(&self, workload_id: &str) -> StateResult<bool> {
        let existed = self.write(|txn| txn.remove(WORKLOADS, workload_id))?;
        debug!(%workload_id, existed, "workload deleted");
        Ok(existed)
    }

    // ── Reservations ───────────────────────────────────────────────

    /// Get a reservation by ID.
    pub fn get_reservation(&self, reservation_id: &str) -> StateResult<Option<Reservation>> {
        self.get_json(RESERVATIONS, reservation_id)
    }

    /// List live reservations on a node.
    pub fn list_reservations_for_node(&self, node_id: &str) -> StateResult<Vec<Reservation>> {
        self.list_json(RESERVATIONS, |r: &Reservation| r.node_id == node_id)
    }

    // ── Placement cursors ──────────────────────────────────────────

    /// Last node assigned under a round-robin cursor key.
    pub fn get_cursor(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CURSORS).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }
}

/// Typed access to the tables inside one write transaction.
pub struct StoreTxn<'a> {
    txn: &'a WriteTransaction,
}

impl StoreTxn<'_> {
    fn read_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        keep: impl Fn(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn write_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.read_json(NODES, node_id)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> StateResult<Vec<Node>> {
        self.scan_json(NODES, |_: &Node| true)
    }

    /// Store a node, bumping its version and `updated_at`.
    pub fn put_node(&self, node: &mut Node) -> StateResult<()> {
        node.version += 1;
        node.updated_at = epoch_secs();
        self.write_json(NODES, &node.id, node)
    }

    pub fn get_workload(&self, workload_id: &str) -> StateResult<Option<Workload>> {
        self.read_json(WORKLOADS, workload_id)
    }

    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        self.write_json(WORKLOADS, &workload.id, workload)
    }

    pub fn delete_workload(&self, workload_id: &str) -> StateResult<bool> {
        self.remove(WORKLOADS, workload_id)
    }

    pub fn workloads_for_node(&self, node_id: &str) -> StateResult<Vec<Workload>> {
        self.scan_json(WORKLOADS, |w: &Workload| w.node_id.as_deref() == Some(node_id))
    }

    pub fn get_reservation(&self, reservation_id: &str) -> StateResult<Option<Reservation>> {
        self.read_json(RESERVATIONS, reservation_id)
    }

    pub fn put_reservation(&self, reservation: &Reservation) -> StateResult<()> {
        self.write_json(RESERVATIONS, &reservation.id, reservation)
    }

    /// Remove a reservation, returning it if it existed.
    pub fn take_reservation(&self, reservation_id: &str) -> StateResult<Option<Reservation>> {
        let existing: Option<Reservation> = self.read_json(RESERVATIONS, reservation_id)?;
        if existing.is_some() {
            self.remove(RESERVATIONS, reservation_id)?;
        }
        Ok(existing)
    }

    pub fn reservations_for_node(&self, node_id: &str) -> StateResult<Vec<Reservation>> {
        self.scan_json(RESERVATIONS, |r: &Reservation| r.node_id == node_id)
    }

    pub fn get_cursor(&self, key: &str) -> StateResult<Option<String>> {
        let table = self.txn.open_table(CURSORS).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    pub fn put_cursor(&self, key: &str, last_node_id: &str) -> StateResult<()> {
        let mut table = self.txn.open_table(CURSORS).map_err(map_err!(Table))?;
        table.insert(key, last_node_id).map_err(map_err!(Write))?;
        Ok(())
    }
}
