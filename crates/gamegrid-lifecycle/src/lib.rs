//! gamegrid-lifecycle — workload orchestration for GameGrid.
//!
//! The [`WorkloadController`] owns every workload status transition. A
//! create runs the full sequence below; every failure after the
//! reservation releases it before returning and leaves the workload in
//! `error` with the message retained.
//!
//! ```text
//! validate ──► pending
//!   └─► place ──► reserve (retry ≤ max_attempts on refusal)
//!         └─► provisioning ──► create container ──► start ──► running
//!                                   │                  │
//!                                   └──── failure ─────┴─► release ──► error
//! ```
//!
//! The [`ControlPlane`] facade bundles the registry, prober, placement
//! engine and controller behind the caller-facing operations and maps
//! every failure to an [`ErrorKind`].

pub mod catalog;
pub mod control_plane;
pub mod controller;
pub mod error;

pub use catalog::{PortSpec, TemplateOverride, WorkloadCatalog, WorkloadTemplate};
pub use control_plane::{ControlAction, ControlPlane, NodeRegistration};
pub use controller::{LifecycleSettings, WorkloadController, WorkloadSpec, WorkloadStats};
pub use error::{ControlPlaneError, ControlPlaneResult, ErrorKind, LifecycleError, LifecycleResult};
