//! gamegrid-health — node health probing for GameGrid.
//!
//! A probe connects to a node's container runtime, lists its running
//! containers, samples each container's stats concurrently and folds them
//! into an aggregate. Success reconciles the aggregate through the ledger
//! and marks the node online; failure or timeout marks it offline and
//! records the error without touching usage.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── Per-node background task (interval, watch shutdown)
//!   │   └── HealthProber::probe(node)
//!   │         ├── list_containers → stats × N (JoinSet)
//!   │         ├── ok      → ResourceLedger::reconcile (online)
//!   │         └── failure → NodeRegistry::mark_offline
//!   └── stop_all() on shutdown
//! ```
//!
//! Probes of different nodes never wait on each other. Nodes in
//! maintenance are probed too, but keep their maintenance status.

pub mod duration;
pub mod error;
pub mod monitor;
pub mod prober;
pub mod report;

pub use duration::parse_duration;
pub use error::{HealthError, HealthResult};
pub use monitor::HealthMonitor;
pub use prober::HealthProber;
pub use report::{ContainerUsage, HealthReport, NodeUsage, ProbeOutcome};
