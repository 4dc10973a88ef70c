//! Construction and teardown of the control plane's dependencies.
//!
//! Everything the core needs is built here exactly once and handed to the
//! components by value or `Arc`; nothing is reached through globals.
//!
//! ```text
//! StateStore ──┬── NodeRegistry ──┬── HealthProber ── HealthMonitor
//!              ├── ResourceLedger ┘        │
//!              ├── PlacementEngine         │
//!              └───────────── WorkloadController ── ControlPlane
//! ContainerRuntime (Docker | memory) wrapped in BoundedRuntime ─┘
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use gamegrid_health::{HealthMonitor, HealthProber};
use gamegrid_ledger::ResourceLedger;
use gamegrid_lifecycle::{ControlPlane, WorkloadController};
use gamegrid_placement::PlacementEngine;
use gamegrid_registry::NodeRegistry;
use gamegrid_runtime::{BoundedRuntime, ContainerRuntime, DockerRuntime, InMemoryRuntime};
use gamegrid_state::StateStore;

use crate::config::{GamegridConfig, RuntimeDriver};

pub struct App {
    pub plane: ControlPlane,
    pub monitor: HealthMonitor,
    pub health_interval: Duration,
}

impl App {
    /// Open the on-disk store under `data_dir` and build everything.
    pub fn open(config: &GamegridConfig, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("create data dir {}", data_dir.display()))?;
        let db_path = config.store_path(data_dir);
        let state = StateStore::open(&db_path).with_context(|| format!("open store {}", db_path.display()))?;
        info!(path = ?db_path, "state store opened");

        Self::assemble(config, state, base_runtime(config))
    }

    /// Wire the components around an already opened store and runtime.
    pub fn assemble(
        config: &GamegridConfig,
        state: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> anyhow::Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(BoundedRuntime::new(runtime, config.runtime_timeouts()?));

        let registry = NodeRegistry::new(state.clone());
        let ledger = ResourceLedger::new(state.clone());
        let prober = HealthProber::new(registry.clone(), ledger, runtime.clone())
            .with_timeout(config.health_timeout()?);
        let placement = PlacementEngine::new(state.clone(), config.location_table());
        let catalog = Arc::new(config.catalog()?);

        let controller = WorkloadController::new(
            state,
            registry.clone(),
            placement.clone(),
            prober.clone(),
            runtime,
            catalog,
        )
        .with_settings(config.lifecycle_settings());

        let health_interval = config.health_interval()?;
        let monitor = HealthMonitor::new(prober.clone(), registry.clone()).with_interval(health_interval);
        let plane = ControlPlane::new(registry, prober, placement, controller);

        info!(
            driver = ?config.runtime.driver,
            strategy = %config.placement.default_strategy,
            locations = config.locations.len(),
            "control plane assembled"
        );
        Ok(Self {
            plane,
            monitor,
            health_interval,
        })
    }

    /// Roll back provisioning runs a previous process did not finish.
    ///
    /// The store file is locked to one process, so nothing else can be
    /// provisioning against it while this runs.
    pub async fn recover(&self) -> anyhow::Result<()> {
        let recovered = self
            .plane
            .recover_interrupted()
            .await
            .context("recover interrupted workloads")?;
        for workload in &recovered {
            info!(workload_id = %workload.id, status = %workload.status, "interrupted workload rolled back");
        }
        Ok(())
    }

    /// Stop every background task.
    pub async fn shutdown(self) {
        self.monitor.stop_all().await;
        info!("control plane stopped");
    }
}

fn base_runtime(config: &GamegridConfig) -> Arc<dyn ContainerRuntime> {
    match config.runtime.driver {
        RuntimeDriver::Docker => {
            let docker = match &config.runtime.api_version {
                Some(version) => DockerRuntime::new().with_api_version(version.clone()),
                None => DockerRuntime::new(),
            };
            Arc::new(docker)
        }
        RuntimeDriver::Memory => Arc::new(InMemoryRuntime::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamegrid_lifecycle::{ControlAction, WorkloadSpec};
    use gamegrid_registry::NewNode;
    use gamegrid_state::{ConnectionConfig, NodeStatus, ResourceVector, WorkloadStatus};

    fn memory_config() -> GamegridConfig {
        let mut config = GamegridConfig::default();
        config.runtime.driver = RuntimeDriver::Memory;
        config
    }

    #[tokio::test]
    async fn open_creates_store_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("state");

        let app = App::open(&memory_config(), &data_dir).unwrap();
        assert!(data_dir.join("gamegrid.redb").exists());
        assert_eq!(app.health_interval, Duration::from_secs(30));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn assembled_plane_serves_requests() {
        let config = memory_config();
        let state = StateStore::open_in_memory().unwrap();
        let app = App::assemble(&config, state, Arc::new(InMemoryRuntime::new())).unwrap();

        let registration = app
            .plane
            .register_node(NewNode {
                name: "node-a".into(),
                location: "eu-west".into(),
                coordinates: None,
                connection: ConnectionConfig {
                    host: "10.0.0.4".into(),
                    port: 2375,
                    api_key: "key".into(),
                },
                totals: ResourceVector::from_cores(4, 8192, 100),
            })
            .await
            .unwrap();
        assert_eq!(registration.node.status, NodeStatus::Online);

        let workload = app
            .plane
            .create_workload(WorkloadSpec {
                name: "survival".into(),
                owner: "user-1".into(),
                kind: "minecraft".into(),
                resources: ResourceVector::from_cores(2, 4096, 20),
                max_players: Some(8),
                auto_restart: true,
                strategy: None,
                hint: None,
            })
            .await
            .unwrap();
        assert_eq!(workload.status, WorkloadStatus::Running);

        app.monitor.sync_with_registry().await.unwrap();
        assert_eq!(app.monitor.active_monitors().await, vec!["node-a"]);

        app.plane
            .control_workload(&workload.id, ControlAction::Delete)
            .await
            .unwrap();
        app.shutdown().await;
    }

    #[tokio::test]
    async fn recover_on_clean_store_is_a_no_op() {
        let state = StateStore::open_in_memory().unwrap();
        let app = App::assemble(&memory_config(), state, Arc::new(InMemoryRuntime::new())).unwrap();

        app.recover().await.unwrap();
        assert!(app.plane.list_workloads().unwrap().is_empty());
        app.shutdown().await;
    }
}
