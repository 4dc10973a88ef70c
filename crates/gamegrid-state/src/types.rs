//! Domain types for the GameGrid state store.
//!
//! These types represent the persisted state of nodes, workloads and
//! capacity reservations. All types are serializable to/from JSON for
//! storage in redb tables.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a node (its unique name).
pub type NodeId = String;

/// Unique identifier for a workload.
pub type WorkloadId = String;

/// Unique identifier for a capacity reservation.
pub type ReservationId = String;

// ── Resources ─────────────────────────────────────────────────────

/// The resource kinds tracked per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Ram,
    Storage,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Ram, ResourceKind::Storage];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Ram => "ram",
            ResourceKind::Storage => "storage",
        };
        f.write_str(s)
    }
}

/// An amount of each resource kind.
///
/// CPU is in millicores, RAM in megabytes, storage in gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu_millis: u64,
    pub ram_mb: u64,
    pub storage_gb: u64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpu_millis: 0,
        ram_mb: 0,
        storage_gb: 0,
    };

    pub fn new(cpu_millis: u64, ram_mb: u64, storage_gb: u64) -> Self {
        Self {
            cpu_millis,
            ram_mb,
            storage_gb,
        }
    }

    /// Build a vector from whole CPU cores.
    pub fn from_cores(cores: u64, ram_mb: u64, storage_gb: u64) -> Self {
        Self::new(cores.saturating_mul(1000), ram_mb, storage_gb)
    }

    pub fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Cpu => self.cpu_millis,
            ResourceKind::Ram => self.ram_mb,
            ResourceKind::Storage => self.storage_gb,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn saturating_add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            ram_mb: self.ram_mb.saturating_add(other.ram_mb),
            storage_gb: self.storage_gb.saturating_add(other.storage_gb),
        }
    }

    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            ram_mb: self.ram_mb.saturating_sub(other.ram_mb),
            storage_gb: self.storage_gb.saturating_sub(other.storage_gb),
        }
    }
}

/// Total and used amount of a single resource kind on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceCounter {
    pub total: u64,
    pub used: u64,
}

impl ResourceCounter {
    pub fn new(total: u64) -> Self {
        Self { total, used: 0 }
    }

    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    /// Fraction of the total in use, in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.used as f64 / self.total as f64).min(1.0)
    }
}

/// Per-kind capacity counters of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub cpu: ResourceCounter,
    pub ram: ResourceCounter,
    pub storage: ResourceCounter,
}

/// The first resource kind a request does not fit into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub kind: ResourceKind,
    pub requested: u64,
    pub available: u64,
}

impl NodeCapacity {
    /// Fresh capacity with the given totals and nothing used.
    pub fn with_totals(totals: ResourceVector) -> Self {
        Self {
            cpu: ResourceCounter::new(totals.cpu_millis),
            ram: ResourceCounter::new(totals.ram_mb),
            storage: ResourceCounter::new(totals.storage_gb),
        }
    }

    pub fn counter(&self, kind: ResourceKind) -> &ResourceCounter {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Ram => &self.ram,
            ResourceKind::Storage => &self.storage,
        }
    }

    pub fn counter_mut(&mut self, kind: ResourceKind) -> &mut ResourceCounter {
        match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Ram => &mut self.ram,
            ResourceKind::Storage => &mut self.storage,
        }
    }

    pub fn totals(&self) -> ResourceVector {
        ResourceVector::new(self.cpu.total, self.ram.total, self.storage.total)
    }

    pub fn used(&self) -> ResourceVector {
        ResourceVector::new(self.cpu.used, self.ram.used, self.storage.used)
    }

    pub fn free(&self) -> ResourceVector {
        ResourceVector::new(self.cpu.free(), self.ram.free(), self.storage.free())
    }

    /// Returns the first kind where `total - used < requested`, if any.
    pub fn shortfall(&self, request: &ResourceVector) -> Option<Shortfall> {
        ResourceKind::ALL.into_iter().find_map(|kind| {
            let available = self.counter(kind).free();
            let requested = request.get(kind);
            (requested > available).then_some(Shortfall {
                kind,
                requested,
                available,
            })
        })
    }

    pub fn fits(&self, request: &ResourceVector) -> bool {
        self.shortfall(request).is_none()
    }

    /// True when `used <= total` holds for every kind.
    pub fn is_consistent(&self) -> bool {
        ResourceKind::ALL
            .into_iter()
            .all(|kind| self.counter(kind).used <= self.counter(kind).total)
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Operational status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "maintenance" => Ok(NodeStatus::Maintenance),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// How the control plane reaches a node's container runtime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
}

impl ConnectionConfig {
    /// `host:port` for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A host offering CPU/RAM/storage capacity to workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Location label (e.g. "eu-west").
    pub location: String,
    /// Explicit coordinates; when absent the location label is resolved.
    pub coordinates: Option<GeoPoint>,
    pub connection: ConnectionConfig,
    pub capacity: NodeCapacity,
    pub status: NodeStatus,
    /// Unix timestamp of the last successful probe.
    pub last_seen: Option<u64>,
    /// Message of the last failed probe, cleared on success.
    pub last_error: Option<String>,
    /// Bumped on every write; used for compare-and-swap.
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Workload ──────────────────────────────────────────────────────

/// Supported game-server workload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Minecraft,
    Valheim,
    Csgo,
    Rust,
    Ark,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 5] = [
        WorkloadKind::Minecraft,
        WorkloadKind::Valheim,
        WorkloadKind::Csgo,
        WorkloadKind::Rust,
        WorkloadKind::Ark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Minecraft => "minecraft",
            WorkloadKind::Valheim => "valheim",
            WorkloadKind::Csgo => "csgo",
            WorkloadKind::Rust => "rust",
            WorkloadKind::Ark => "ark",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unsupported workload type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workload type: {0}")]
pub struct UnknownWorkloadKind(pub String);

impl FromStr for WorkloadKind {
    type Err = UnknownWorkloadKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownWorkloadKind(s.to_string()))
    }
}

/// Lifecycle status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Provisioning => "provisioning",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Stopping => "stopping",
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single hosted game-server instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub id: WorkloadId,
    pub name: String,
    pub owner: String,
    pub kind: WorkloadKind,
    pub resources: ResourceVector,
    pub max_players: Option<u32>,
    pub auto_restart: bool,
    /// Node the workload is placed on; `None` until placed.
    pub node_id: Option<NodeId>,
    /// Live reservation backing this workload, if any.
    pub reservation_id: Option<ReservationId>,
    pub status: WorkloadStatus,
    /// Container id returned by the runtime.
    pub runtime_handle: Option<String>,
    pub error: Option<String>,
    pub last_started: Option<u64>,
    pub last_stopped: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Reservation ───────────────────────────────────────────────────

/// Capacity committed on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub node_id: NodeId,
    pub workload_id: Option<WorkloadId>,
    pub resources: ResourceVector,
    pub created_at: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
