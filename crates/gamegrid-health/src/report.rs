//! Probe results.

use serde::{Deserialize, Serialize};

use gamegrid_runtime::{ContainerStats, ContainerSummary};
use gamegrid_state::{NodeId, NodeStatus};

const MB: f64 = 1024.0 * 1024.0;

/// How a probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    TimedOut,
}

/// Measured usage of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub id: String,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
}

impl ContainerUsage {
    pub fn from_stats(summary: &ContainerSummary, stats: &ContainerStats) -> Self {
        Self {
            id: summary.id.clone(),
            name: summary.name.clone(),
            cpu_percent: stats.cpu_percent(),
            memory_mb: stats.memory_usage_bytes as f64 / MB,
            memory_percent: stats.memory_percent(),
        }
    }
}

/// Aggregate usage across a node's running containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    /// Sum of container CPU%, where 100% is one core.
    pub cpu_percent: f64,
    /// `cpu_percent × 10`, rounded.
    pub cpu_millis: u64,
    pub ram_mb: u64,
    pub running_containers: usize,
}

impl NodeUsage {
    pub fn aggregate(containers: &[ContainerUsage]) -> Self {
        let cpu_percent: f64 = containers.iter().map(|c| c.cpu_percent).sum();
        let memory_mb: f64 = containers.iter().map(|c| c.memory_mb).sum();
        Self {
            cpu_percent,
            cpu_millis: (cpu_percent * 10.0).round() as u64,
            ram_mb: memory_mb.round() as u64,
            running_containers: containers.len(),
        }
    }
}

/// Result of probing one node.
///
/// `usage` is `None` whenever the node could not be measured; usage is
/// never guessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub node_id: NodeId,
    pub outcome: ProbeOutcome,
    /// Node status after the probe was applied.
    pub status: NodeStatus,
    pub usage: Option<NodeUsage>,
    pub containers: Vec<ContainerUsage>,
    pub error: Option<String>,
    pub probed_at: u64,
    pub elapsed_ms: u64,
}

impl HealthReport {
    pub fn is_reachable(&self) -> bool {
        self.outcome == ProbeOutcome::Reachable
    }
}
