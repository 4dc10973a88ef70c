//! Runtime-facing types: container specs, state, and resource counters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => f.write_str("tcp"),
            PortProtocol::Udp => f.write_str("udp"),
        }
    }
}

/// A container port published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: PortProtocol,
}

impl PortBinding {
    /// Docker-style port key, e.g. `25565/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub ports: Vec<PortBinding>,
    /// Bind mounts in `host:container` form.
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub memory_limit_mb: Option<u64>,
    pub cpu_millis: Option<u64>,
    /// Restart the container unless explicitly stopped.
    pub auto_restart: bool,
}

/// Summary of a container returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// Inspected container state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Runtime status string ("created", "running", "exited", ...).
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<String>,
    pub error: Option<String>,
}

/// Cumulative CPU counters at one sampling instant (nanoseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CpuSample {
    pub container_usage: u64,
    pub system_usage: u64,
}

/// Bytes received and sent on one network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkUsage {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// One-shot resource counters for a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu: CpuSample,
    pub precpu: CpuSample,
    pub online_cpus: u32,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub networks: BTreeMap<String, NetworkUsage>,
}

impl ContainerStats {
    /// CPU usage in percent of one core.
    ///
    /// `(Δcontainer / Δsystem) × cores × 100`; a zero or negative system
    /// delta (first sample, counter reset) reports 0.
    pub fn cpu_percent(&self) -> f64 {
        let system_delta = self.cpu.system_usage as i128 - self.precpu.system_usage as i128;
        let container_delta =
            self.cpu.container_usage as i128 - self.precpu.container_usage as i128;
        if system_delta <= 0 || container_delta <= 0 {
            return 0.0;
        }
        let cores = f64::from(self.online_cpus.max(1));
        (container_delta as f64 / system_delta as f64) * cores * 100.0
    }

    /// Memory usage as a percent of the container limit.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        self.memory_usage_bytes as f64 / self.memory_limit_bytes as f64 * 100.0
    }

    pub fn network_totals(&self) -> NetworkUsage {
        self.networks
            .values()
            .fold(NetworkUsage::default(), |acc, n| NetworkUsage {
                rx_bytes: acc.rx_bytes.saturating_add(n.rx_bytes),
                tx_bytes: acc.tx_bytes.saturating_add(n.tx_bytes),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pre: (u64, u64), cur: (u64, u64), cpus: u32) -> ContainerStats {
        ContainerStats {
            precpu: CpuSample {
                container_usage: pre.0,
                system_usage: pre.1,
            },
            cpu: CpuSample {
                container_usage: cur.0,
                system_usage: cur.1,
            },
            online_cpus: cpus,
            ..ContainerStats::default()
        }
    }

    #[test]
    fn cpu_percent_scales_by_core_count() {
        // Container used a quarter of the system delta on a 4-core host: one full core.
        let s = stats((1_000, 10_000), (3_000, 18_000), 4);
        assert!((s.cpu_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_percent_guards_zero_and_negative_system_delta() {
        assert_eq!(stats((0, 5_000), (1_000, 5_000), 2).cpu_percent(), 0.0);
        assert_eq!(stats((0, 9_000), (1_000, 5_000), 2).cpu_percent(), 0.0);
    }

    #[test]
    fn memory_percent_without_limit_is_zero() {
        let mut s = ContainerStats::default();
        s.memory_usage_bytes = 512;
        assert_eq!(s.memory_percent(), 0.0);
        s.memory_limit_bytes = 1024;
        assert_eq!(s.memory_percent(), 50.0);
    }

    #[test]
    fn network_totals_sum_interfaces() {
        let mut s = ContainerStats::default();
        s.networks.insert("eth0".into(), NetworkUsage { rx_bytes: 10, tx_bytes: 5 });
        s.networks.insert("eth1".into(), NetworkUsage { rx_bytes: 1, tx_bytes: 2 });
        assert_eq!(s.network_totals(), NetworkUsage { rx_bytes: 11, tx_bytes: 7 });
    }

    #[test]
    fn port_binding_key() {
        let p = PortBinding {
            container_port: 2456,
            host_port: 2456,
            protocol: PortProtocol::Udp,
        };
        assert_eq!(p.key(), "2456/udp");
    }
}
