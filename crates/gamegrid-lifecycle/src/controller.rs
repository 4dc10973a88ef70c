//! WorkloadController — create, control and delete workloads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use gamegrid_health::HealthProber;
use gamegrid_ledger::{LedgerError, ResourceLedger};
use gamegrid_placement::{LocationHint, PlacementEngine, PlacementRequest, PlacementStrategy};
use gamegrid_registry::NodeRegistry;
use gamegrid_runtime::{ContainerRuntime, ContainerSpec, ContainerStats, RuntimeError};
use gamegrid_state::*;

use crate::catalog::{WorkloadCatalog, container_name};
use crate::error::{LifecycleError, LifecycleResult};

/// Caller input for a new workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub owner: String,
    /// Workload type name, e.g. `minecraft`.
    pub kind: String,
    pub resources: ResourceVector,
    pub max_players: Option<u32>,
    #[serde(default)]
    pub auto_restart: bool,
    /// Falls back to [`LifecycleSettings::default_strategy`].
    pub strategy: Option<PlacementStrategy>,
    pub hint: Option<LocationHint>,
}

/// Tunables for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub default_strategy: PlacementStrategy,
    /// Place-then-reserve attempts before a refusal is surfaced.
    pub max_attempts: u32,
    /// Probe the chosen node before reserving on it.
    pub probe_before_reserve: bool,
    /// Log lines returned when the caller does not ask for a count.
    pub log_tail: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            default_strategy: PlacementStrategy::LeastLoaded,
            max_attempts: 3,
            probe_before_reserve: false,
            log_tail: 100,
        }
    }
}

/// Live resource usage of a workload's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStats {
    pub cpu_percent: f64,
    pub memory_usage_mb: f64,
    pub memory_limit_mb: f64,
    pub memory_percent: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl From<&ContainerStats> for WorkloadStats {
    fn from(stats: &ContainerStats) -> Self {
        const MB: f64 = 1024.0 * 1024.0;
        let network = stats.network_totals();
        Self {
            cpu_percent: stats.cpu_percent(),
            memory_usage_mb: stats.memory_usage_bytes as f64 / MB,
            memory_limit_mb: stats.memory_limit_bytes as f64 / MB,
            memory_percent: stats.memory_percent(),
            rx_bytes: network.rx_bytes,
            tx_bytes: network.tx_bytes,
        }
    }
}

/// A failure after capacity was reserved, plus the container left behind
/// if it could not be removed.
type LaunchFailure = (LifecycleError, Option<String>);

/// Owns every workload status transition.
#[derive(Clone)]
pub struct WorkloadController {
    state: StateStore,
    registry: NodeRegistry,
    placement: PlacementEngine,
    prober: HealthProber,
    runtime: Arc<dyn ContainerRuntime>,
    catalog: Arc<WorkloadCatalog>,
    settings: LifecycleSettings,
}

impl WorkloadController {
    pub fn new(
        state: StateStore,
        registry: NodeRegistry,
        placement: PlacementEngine,
        prober: HealthProber,
        runtime: Arc<dyn ContainerRuntime>,
        catalog: Arc<WorkloadCatalog>,
    ) -> Self {
        Self {
            state,
            registry,
            placement,
            prober,
            runtime,
            catalog,
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn get(&self, workload_id: &str) -> LifecycleResult<Workload> {
        self.state
            .get_workload(workload_id)?
            .ok_or_else(|| LifecycleError::NotFound(workload_id.to_string()))
    }

    pub fn list(&self) -> LifecycleResult<Vec<Workload>> {
        Ok(self.state.list_workloads()?)
    }

    pub fn list_for_node(&self, node_id: &str) -> LifecycleResult<Vec<Workload>> {
        Ok(self.state.list_workloads_for_node(node_id)?)
    }

    /// Validate, place, reserve and provision a new workload.
    ///
    /// The workload record is written as `pending` before placement and is
    /// kept on failure: it ends in `error` with the message retained and
    /// without a reservation.
    pub async fn create(&self, spec: WorkloadSpec) -> LifecycleResult<Workload> {
        let kind = validate(&spec)?;
        let now = epoch_secs();
        let workload = Workload {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name.trim().to_string(),
            owner: spec.owner.trim().to_string(),
            kind,
            resources: spec.resources,
            max_players: spec.max_players,
            auto_restart: spec.auto_restart,
            node_id: None,
            reservation_id: None,
            status: WorkloadStatus::Pending,
            runtime_handle: None,
            error: None,
            last_started: None,
            last_stopped: None,
            created_at: now,
            updated_at: now,
        };
        self.state.put_workload(&workload)?;
        info!(workload_id = %workload.id, %kind, owner = %workload.owner, "workload created");

        let request = self.placement_request(&workload, spec.strategy, spec.hint);
        self.provision_detached(workload, request).await
    }

    /// Re-run provisioning for a workload whose create failed.
    ///
    /// Only a workload in `error` that holds neither a reservation nor a
    /// container qualifies.
    pub async fn reprovision(
        &self,
        workload_id: &str,
        strategy: Option<PlacementStrategy>,
        hint: Option<LocationHint>,
    ) -> LifecycleResult<Workload> {
        let workload = self.modify(workload_id, |w| {
            if w.status != WorkloadStatus::Error || w.reservation_id.is_some() || w.runtime_handle.is_some() {
                return Err(LifecycleError::InvalidState {
                    id: w.id.clone(),
                    status: w.status,
                    action: "reprovision",
                });
            }
            w.status = WorkloadStatus::Pending;
            w.error = None;
            w.node_id = None;
            Ok(())
        })?;
        info!(%workload_id, "workload reprovisioning");

        let request = self.placement_request(&workload, strategy, hint);
        self.provision_detached(workload, request).await
    }

    /// Roll back every workload still `pending` or `provisioning`.
    ///
    /// Such a record belongs to a provisioning run that never finished, as
    /// after a crash. Any container the run created is removed and the
    /// reservation released; the workload ends in `error`. Call this only
    /// while no create runs against the same store.
    pub async fn recover_interrupted(&self) -> LifecycleResult<Vec<Workload>> {
        let stale: Vec<Workload> = self
            .list()?
            .into_iter()
            .filter(|w| in_flight(w.status))
            .collect();

        let mut recovered = Vec::with_capacity(stale.len());
        for workload in stale {
            self.abandon(&workload, "interrupted before completion").await;
            recovered.push(self.get(&workload.id)?);
        }
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "recovered interrupted workloads");
        }
        Ok(recovered)
    }

    pub async fn start(&self, workload_id: &str) -> LifecycleResult<Workload> {
        let workload = self.get(workload_id)?;
        if workload.status == WorkloadStatus::Running {
            return Ok(workload);
        }
        let (conn, handle) = self.controllable(&workload, "start")?;

        if let Err(e) = self.runtime.start(&conn, &handle).await {
            return Err(self.record_runtime_failure(workload_id, "start", e));
        }
        let workload = self.modify(workload_id, |w| {
            w.status = WorkloadStatus::Running;
            w.last_started = Some(epoch_secs());
            w.error = None;
            Ok(())
        })?;
        info!(%workload_id, "workload started");
        Ok(workload)
    }

    /// Stop the container. The reservation is kept.
    pub async fn stop(&self, workload_id: &str) -> LifecycleResult<Workload> {
        let workload = self.get(workload_id)?;
        if workload.status == WorkloadStatus::Stopped {
            return Ok(workload);
        }
        let (conn, handle) = self.controllable(&workload, "stop")?;

        if let Err(e) = self.runtime.stop(&conn, &handle).await {
            return Err(self.record_runtime_failure(workload_id, "stop", e));
        }
        let workload = self.modify(workload_id, |w| {
            w.status = WorkloadStatus::Stopped;
            w.last_stopped = Some(epoch_secs());
            w.error = None;
            Ok(())
        })?;
        info!(%workload_id, "workload stopped");
        Ok(workload)
    }

    pub async fn restart(&self, workload_id: &str) -> LifecycleResult<Workload> {
        let workload = self.get(workload_id)?;
        let (conn, handle) = self.controllable(&workload, "restart")?;

        if let Err(e) = self.runtime.restart(&conn, &handle).await {
            return Err(self.record_runtime_failure(workload_id, "restart", e));
        }
        let workload = self.modify(workload_id, |w| {
            w.status = WorkloadStatus::Running;
            w.last_started = Some(epoch_secs());
            w.error = None;
            Ok(())
        })?;
        info!(%workload_id, "workload restarted");
        Ok(workload)
    }

    /// Stop if running, remove the container, release the reservation and
    /// drop the record.
    ///
    /// A container that is already gone is not an error. Release is
    /// idempotent, so deleting a stopped or failed workload is safe.
    pub async fn delete(&self, workload_id: &str) -> LifecycleResult<()> {
        let workload = self.get(workload_id)?;
        if in_flight(workload.status) {
            return Err(LifecycleError::InvalidState {
                id: workload.id,
                status: workload.status,
                action: "delete",
            });
        }

        if let (Some(handle), Some(node_id)) = (&workload.runtime_handle, &workload.node_id) {
            let conn = self.registry.get(node_id)?.connection;

            if workload.status == WorkloadStatus::Running {
                self.modify(workload_id, |w| {
                    w.status = WorkloadStatus::Stopping;
                    Ok(())
                })?;
                match self.runtime.stop(&conn, handle).await {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                    Err(e) => return Err(self.record_runtime_failure(workload_id, "stop", e)),
                }
            }

            match self.runtime.remove(&conn, handle).await {
                Ok(()) => {}
                Err(RuntimeError::NotFound(_)) => debug!(%workload_id, "container already removed"),
                Err(e) => return Err(self.record_runtime_failure(workload_id, "remove", e)),
            }
        }

        self.state.write(|txn| -> LifecycleResult<()> {
            if let Some(w) = txn.get_workload(workload_id)? {
                if let Some(reservation_id) = &w.reservation_id {
                    ResourceLedger::release_in(txn, reservation_id)?;
                }
                txn.delete_workload(workload_id)?;
            }
            Ok(())
        })?;
        info!(%workload_id, "workload deleted");
        Ok(())
    }

    /// Last `tail` log lines of the workload's container.
    pub async fn logs(&self, workload_id: &str, tail: Option<usize>) -> LifecycleResult<String> {
        let workload = self.get(workload_id)?;
        let (conn, handle) = self.container_of(&workload, "read logs of")?;
        let tail = tail.unwrap_or(self.settings.log_tail);
        Ok(self.runtime.logs(&conn, &handle, tail).await?)
    }

    pub async fn stats(&self, workload_id: &str) -> LifecycleResult<WorkloadStats> {
        let workload = self.get(workload_id)?;
        let (conn, handle) = self.container_of(&workload, "read stats of")?;
        let stats = self.runtime.stats(&conn, &handle).await?;
        Ok(WorkloadStats::from(&stats))
    }

    // ── Provisioning ───────────────────────────────────────────────

    fn placement_request(
        &self,
        workload: &Workload,
        strategy: Option<PlacementStrategy>,
        hint: Option<LocationHint>,
    ) -> PlacementRequest {
        let strategy = strategy.unwrap_or(self.settings.default_strategy);
        let request = PlacementRequest::new(workload.resources, strategy)
            .with_resource_class(workload.kind.as_str());
        match hint {
            Some(hint) => request.with_hint(hint),
            None => request,
        }
    }

    /// Run [`provision`](Self::provision) on its own task, so a caller that
    /// stops waiting cannot cut it off between reserve and rollback.
    async fn provision_detached(&self, workload: Workload, request: PlacementRequest) -> LifecycleResult<Workload> {
        let workload_id = workload.id.clone();
        let controller = self.clone();
        let task = tokio::spawn(async move { controller.provision(workload, &request).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(%workload_id, error = %e, "provisioning task failed");
                match self.get(&workload_id) {
                    Ok(w) if in_flight(w.status) => Err(self.abandon(&w, "provisioning task failed").await),
                    _ => Err(LifecycleError::Interrupted {
                        id: workload_id,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    /// Place, reserve, create and start. Rolls back on any failure.
    async fn provision(&self, workload: Workload, request: &PlacementRequest) -> LifecycleResult<Workload> {
        let container = match self.catalog.render(&workload) {
            Ok(spec) => spec,
            Err(e) => return Err(self.fail(&workload, e, None)),
        };

        let (workload, node) = match self.place_and_reserve(&workload, request).await {
            Ok(placed) => placed,
            Err(e) => return Err(self.fail(&workload, e, None)),
        };
        info!(
            workload_id = %workload.id,
            node_id = %node.id,
            strategy = %request.strategy,
            "workload placed"
        );

        match self.launch(&workload, &node.connection, &container).await {
            Ok(workload) => {
                info!(workload_id = %workload.id, node_id = %node.id, "workload running");
                Ok(workload)
            }
            Err((e, leftover)) => Err(self.fail(&workload, e, leftover)),
        }
    }

    /// Select a node and reserve on it, re-placing against fresh state when
    /// the reservation is refused.
    async fn place_and_reserve(
        &self,
        workload: &Workload,
        request: &PlacementRequest,
    ) -> LifecycleResult<(Workload, Node)> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let decision = self.placement.place(request)?;
            let node_id = decision.node_id;

            let outcome = match self.unreachable_before_reserve(&node_id).await? {
                Some(refusal) => Err(refusal),
                None => self.reserve(workload, &node_id),
            };

            match outcome {
                Ok(placed) => return Ok(placed),
                Err(LifecycleError::Ledger(e)) if is_refusal(&e) && attempt < max_attempts => {
                    warn!(
                        workload_id = %workload.id,
                        %node_id,
                        attempt,
                        error = %e,
                        "reservation refused, placing again"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// When probing before reserve is enabled, a refusal for a node that
    /// does not answer.
    async fn unreachable_before_reserve(&self, node_id: &str) -> LifecycleResult<Option<LifecycleError>> {
        if !self.settings.probe_before_reserve {
            return Ok(None);
        }
        let report = self.prober.probe(node_id).await?;
        if report.is_reachable() {
            return Ok(None);
        }
        Ok(Some(LifecycleError::Ledger(LedgerError::NodeUnavailable {
            node_id: node_id.to_string(),
            status: report.status,
        })))
    }

    /// Reserve capacity and bind it to the workload in one transaction.
    fn reserve(&self, workload: &Workload, node_id: &str) -> LifecycleResult<(Workload, Node)> {
        self.state.write(|txn| {
            let reservation = ResourceLedger::reserve_in(txn, node_id, &workload.resources, Some(&workload.id))?;
            let mut current = txn
                .get_workload(&workload.id)?
                .ok_or_else(|| LifecycleError::NotFound(workload.id.clone()))?;
            current.node_id = Some(node_id.to_string());
            current.reservation_id = Some(reservation.id);
            current.status = WorkloadStatus::Provisioning;
            current.updated_at = epoch_secs();
            txn.put_workload(&current)?;

            let node = txn
                .get_node(node_id)?
                .ok_or_else(|| LedgerError::NodeNotFound(node_id.to_string()))?;
            Ok((current, node))
        })
    }

    /// Create and start the container on the reserved node.
    ///
    /// Every failure removes the container again before returning; only a
    /// container that could not be removed is reported back.
    async fn launch(
        &self,
        workload: &Workload,
        conn: &ConnectionConfig,
        container: &ContainerSpec,
    ) -> Result<Workload, LaunchFailure> {
        let handle = match self.runtime.create_container(conn, container).await {
            Ok(handle) => handle,
            // The engine may have created it before the deadline hit.
            Err(e) if e.is_timeout() => {
                let leftover = self.discard(&workload.id, conn, &container.name).await;
                return Err((e.into(), leftover));
            }
            Err(e) => return Err((e.into(), None)),
        };
        debug!(workload_id = %workload.id, %handle, "container created");

        let recorded = self.modify(&workload.id, |w| {
            w.runtime_handle = Some(handle.clone());
            Ok(())
        });
        if let Err(e) = recorded {
            let leftover = self.discard(&workload.id, conn, &handle).await;
            return Err((e, leftover));
        }

        if let Err(e) = self.runtime.start(conn, &handle).await {
            let leftover = self.discard(&workload.id, conn, &handle).await;
            return Err((e.into(), leftover));
        }

        let running = self.modify(&workload.id, |w| {
            w.status = WorkloadStatus::Running;
            w.last_started = Some(epoch_secs());
            w.error = None;
            Ok(())
        });
        match running {
            Ok(workload) => Ok(workload),
            Err(e) => {
                let leftover = self.discard(&workload.id, conn, &handle).await;
                Err((e, leftover))
            }
        }
    }

    /// Force-remove the container of a failed attempt. Returns the handle
    /// when it is still there.
    async fn discard(&self, workload_id: &str, conn: &ConnectionConfig, handle: &str) -> Option<String> {
        match self.runtime.remove(conn, handle).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => None,
            Err(e) => {
                warn!(%workload_id, %handle, error = %e, "failed to remove container");
                Some(handle.to_string())
            }
        }
    }

    /// Clean up after a provisioning run that stopped part way and roll the
    /// workload back.
    async fn abandon(&self, workload: &Workload, reason: &str) -> LifecycleError {
        let leftover = match &workload.node_id {
            Some(node_id) => {
                let handle = workload
                    .runtime_handle
                    .clone()
                    .unwrap_or_else(|| container_name(&workload.id));
                match self.registry.get(node_id) {
                    Ok(node) => self.discard(&workload.id, &node.connection, &handle).await,
                    Err(e) => {
                        warn!(workload_id = %workload.id, %node_id, error = %e, "cannot reach node of interrupted workload");
                        workload.runtime_handle.clone()
                    }
                }
            }
            None => None,
        };
        let cause = LifecycleError::Interrupted {
            id: workload.id.clone(),
            reason: reason.to_string(),
        };
        self.fail(workload, cause, leftover)
    }

    /// Roll a failed provisioning attempt back and return its cause.
    ///
    /// Releases the reservation, if any, and records the failure in one
    /// transaction. The node binding is kept only when a container could
    /// not be removed, with its handle, so it can still be deleted. When
    /// the record itself is gone the reservation of `workload` is released.
    fn fail(&self, workload: &Workload, cause: LifecycleError, leftover: Option<String>) -> LifecycleError {
        let workload_id = workload.id.as_str();
        let message = cause.to_string();
        let rolled_back = self.state.write(|txn| -> LifecycleResult<Option<Reservation>> {
            let Some(mut w) = txn.get_workload(workload_id)? else {
                return match &workload.reservation_id {
                    Some(reservation_id) => Ok(ResourceLedger::release_in(txn, reservation_id)?),
                    None => Ok(None),
                };
            };
            let released = match w.reservation_id.take() {
                Some(reservation_id) => ResourceLedger::release_in(txn, &reservation_id)?,
                None => None,
            };
            w.status = WorkloadStatus::Error;
            w.error = Some(match &w.node_id {
                Some(node_id) => format!("{message} (node {node_id})"),
                None => message.clone(),
            });
            match &leftover {
                Some(handle) => w.runtime_handle = Some(handle.clone()),
                None => {
                    w.node_id = None;
                    w.runtime_handle = None;
                }
            }
            w.updated_at = epoch_secs();
            txn.put_workload(&w)?;
            Ok(released)
        });

        match rolled_back {
            Ok(Some(released)) => warn!(
                %workload_id,
                node_id = %released.node_id,
                reservation_id = %released.id,
                error = %message,
                "provisioning failed, reservation released"
            ),
            Ok(None) => warn!(%workload_id, error = %message, "provisioning failed"),
            Err(e) => error!(%workload_id, error = %e, cause = %message, "failed to roll back workload"),
        }
        cause
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn modify(
        &self,
        workload_id: &str,
        f: impl FnOnce(&mut Workload) -> LifecycleResult<()>,
    ) -> LifecycleResult<Workload> {
        self.state.write(|txn| {
            let mut w = txn
                .get_workload(workload_id)?
                .ok_or_else(|| LifecycleError::NotFound(workload_id.to_string()))?;
            f(&mut w)?;
            w.updated_at = epoch_secs();
            txn.put_workload(&w)?;
            Ok(w)
        })
    }

    /// Connection and handle for a start/stop/restart.
    fn controllable(&self, workload: &Workload, action: &'static str) -> LifecycleResult<(ConnectionConfig, String)> {
        if matches!(
            workload.status,
            WorkloadStatus::Pending | WorkloadStatus::Provisioning | WorkloadStatus::Stopping
        ) {
            return Err(LifecycleError::InvalidState {
                id: workload.id.clone(),
                status: workload.status,
                action,
            });
        }
        self.container_of(workload, action)
    }

    fn container_of(&self, workload: &Workload, action: &'static str) -> LifecycleResult<(ConnectionConfig, String)> {
        match (&workload.runtime_handle, &workload.node_id) {
            (Some(handle), Some(node_id)) => Ok((self.registry.get(node_id)?.connection, handle.clone())),
            _ => Err(LifecycleError::InvalidState {
                id: workload.id.clone(),
                status: workload.status,
                action,
            }),
        }
    }

    /// Mark a workload `error` after a runtime call failed. The reservation
    /// stays with the workload.
    fn record_runtime_failure(&self, workload_id: &str, action: &str, err: RuntimeError) -> LifecycleError {
        let message = format!("{action} failed: {err}");
        let recorded = self.modify(workload_id, |w| {
            w.status = WorkloadStatus::Error;
            w.error = Some(message.clone());
            Ok(())
        });
        match recorded {
            Ok(_) => warn!(%workload_id, action, error = %err, "runtime call failed"),
            Err(e) => error!(%workload_id, action, error = %e, "failed to record runtime failure"),
        }
        err.into()
    }
}

/// Check caller input and resolve the workload type.
fn validate(spec: &WorkloadSpec) -> LifecycleResult<WorkloadKind> {
    if spec.name.trim().is_empty() {
        return Err(LifecycleError::Validation("name must not be empty".into()));
    }
    if spec.owner.trim().is_empty() {
        return Err(LifecycleError::Validation("owner must not be empty".into()));
    }
    let kind: WorkloadKind = spec
        .kind
        .parse()
        .map_err(|e: UnknownWorkloadKind| LifecycleError::Validation(e.to_string()))?;
    for resource in ResourceKind::ALL {
        if spec.resources.get(resource) == 0 {
            return Err(LifecycleError::Validation(format!("{resource} must be positive")));
        }
    }
    if spec.max_players == Some(0) {
        return Err(LifecycleError::Validation("max_players must be positive".into()));
    }
    Ok(kind)
}

/// Statuses only a running provisioning attempt may hold.
fn in_flight(status: WorkloadStatus) -> bool {
    matches!(status, WorkloadStatus::Pending | WorkloadStatus::Provisioning)
}

/// Reservation failures that fresh placement may get past.
fn is_refusal(e: &LedgerError) -> bool {
    matches!(e, LedgerError::Insufficient { .. } | LedgerError::NodeUnavailable { .. })
}
