//! HealthProber — one-shot node probes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use gamegrid_ledger::{MeasuredUsage, ResourceLedger};
use gamegrid_registry::{NodeFilter, NodeRegistry, RegistryError};
use gamegrid_runtime::{ContainerRuntime, RuntimeError, RuntimeResult};
use gamegrid_state::{ConnectionConfig, NodeStatus, epoch_secs};

use crate::error::{HealthError, HealthResult};
use crate::report::{ContainerUsage, HealthReport, NodeUsage, ProbeOutcome};

/// Probes nodes through their container runtime.
#[derive(Clone)]
pub struct HealthProber {
    registry: NodeRegistry,
    ledger: ResourceLedger,
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(registry: NodeRegistry, ledger: ResourceLedger, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            registry,
            ledger,
            runtime,
            timeout: Duration::from_secs(5),
        }
    }

    /// Bound for a whole probe (listing plus every stats call).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one node and apply the result.
    ///
    /// A runtime failure or timeout is not an error: it is applied to the
    /// node (offline, error recorded) and returned in the report. Errors
    /// are reserved for unknown nodes and store failures.
    pub async fn probe(&self, node_id: &str) -> HealthResult<HealthReport> {
        let node = match self.registry.get(node_id) {
            Ok(node) => node,
            Err(RegistryError::NotFound(_)) => return Err(HealthError::NodeNotFound(node_id.to_string())),
            Err(e) => return Err(e.into()),
        };

        let started = Instant::now();
        let measured = tokio::time::timeout(
            self.timeout,
            measure(self.runtime.clone(), node.connection.clone()),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match measured {
            Ok(Ok(containers)) => {
                let usage = NodeUsage::aggregate(&containers);
                let node = self.ledger.reconcile(
                    node_id,
                    &MeasuredUsage {
                        cpu_millis: usage.cpu_millis,
                        ram_mb: usage.ram_mb,
                    },
                )?;
                debug!(
                    %node_id,
                    containers = usage.running_containers,
                    cpu_percent = usage.cpu_percent,
                    ram_mb = usage.ram_mb,
                    elapsed_ms,
                    "probe succeeded"
                );
                Ok(HealthReport {
                    node_id: node_id.to_string(),
                    outcome: ProbeOutcome::Reachable,
                    status: node.status,
                    usage: Some(usage),
                    containers,
                    error: None,
                    probed_at: epoch_secs(),
                    elapsed_ms,
                })
            }
            Ok(Err(e)) => self.record_failure(node_id, ProbeOutcome::Unreachable, e.to_string(), elapsed_ms),
            Err(_) => {
                let message = format!("probe timed out after {:?}", self.timeout);
                self.record_failure(node_id, ProbeOutcome::TimedOut, message, elapsed_ms)
            }
        }
    }

    fn record_failure(
        &self,
        node_id: &str,
        outcome: ProbeOutcome,
        message: String,
        elapsed_ms: u64,
    ) -> HealthResult<HealthReport> {
        let node = self.registry.mark_offline(node_id, &message)?;
        debug!(%node_id, ?outcome, error = %message, elapsed_ms, "probe failed");
        Ok(HealthReport {
            node_id: node_id.to_string(),
            outcome,
            status: node.status,
            usage: None,
            containers: Vec::new(),
            error: Some(message),
            probed_at: epoch_secs(),
            elapsed_ms,
        })
    }

    /// Probe every registered node concurrently.
    ///
    /// A node whose probe cannot be applied is logged and left out; it does
    /// not affect the others. Reports are ordered by node id.
    pub async fn probe_all(&self) -> HealthResult<Vec<HealthReport>> {
        let nodes = self.registry.list(&NodeFilter::default())?;
        let mut tasks = JoinSet::new();
        for node in nodes {
            let prober = self.clone();
            tasks.spawn(async move {
                let result = prober.probe(&node.id).await;
                (node.id, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((node_id, Err(e))) => error!(%node_id, error = %e, "failed to apply probe result"),
                Err(e) => error!(error = %e, "probe task panicked"),
            }
        }
        reports.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(reports)
    }

    /// Probe synchronously and mark the node online only if it answers.
    ///
    /// This is the only way out of maintenance. On failure the node stays
    /// or becomes offline and the probe error is returned.
    pub async fn bring_online(&self, node_id: &str) -> HealthResult<HealthReport> {
        let mut report = self.probe(node_id).await?;
        match report.outcome {
            ProbeOutcome::Reachable => {
                if report.status != NodeStatus::Online {
                    report.status = self.registry.mark_online(node_id)?.status;
                }
                info!(%node_id, "node brought online");
                Ok(report)
            }
            ProbeOutcome::Unreachable => {
                // A maintenance node stays in maintenance on a failed probe;
                // a failed bring-online takes it out.
                if report.status == NodeStatus::Maintenance {
                    self.registry.release_maintenance(node_id)?;
                }
                warn!(%node_id, "node could not be brought online");
                Err(HealthError::Unreachable {
                    node_id: node_id.to_string(),
                    reason: report.error.unwrap_or_default(),
                })
            }
            ProbeOutcome::TimedOut => {
                if report.status == NodeStatus::Maintenance {
                    self.registry.release_maintenance(node_id)?;
                }
                warn!(%node_id, timeout = ?self.timeout, "node could not be brought online");
                Err(HealthError::ProbeTimeout {
                    node_id: node_id.to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}

/// List running containers and sample their stats concurrently.
async fn measure(
    runtime: Arc<dyn ContainerRuntime>,
    conn: ConnectionConfig,
) -> RuntimeResult<Vec<ContainerUsage>> {
    let running = runtime.list_containers(&conn).await?;
    let conn = Arc::new(conn);

    let mut tasks = JoinSet::new();
    for summary in running {
        let runtime = runtime.clone();
        let conn = conn.clone();
        tasks.spawn(async move {
            let stats = runtime.stats(&conn, &summary.id).await;
            (summary, stats)
        });
    }

    let mut usage = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (summary, stats) = match joined {
            Ok(sampled) => sampled,
            Err(e) => {
                warn!(error = %e, "stats task failed");
                continue;
            }
        };
        match stats {
            Ok(stats) => usage.push(ContainerUsage::from_stats(&summary, &stats)),
            // Exited between listing and sampling.
            Err(RuntimeError::NotFound(_)) => {
                debug!(container_id = %summary.id, "container gone before stats");
            }
            Err(e) => return Err(e),
        }
    }
    usage.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(usage)
}
