//! gamegrid-runtime — the container runtime collaborator.
//!
//! The control plane talks to each node's container runtime through the
//! object-safe [`ContainerRuntime`] trait. Every call names the node's
//! [`ConnectionConfig`](gamegrid_state::ConnectionConfig), so a single
//! runtime client is constructed at startup and shared by reference.
//!
//! # Implementations
//!
//! ```text
//! ContainerRuntime
//!   ├── DockerRuntime   (Docker Engine HTTP API over hyper)
//!   ├── InMemoryRuntime (scriptable, for tests and dry runs)
//!   └── BoundedRuntime  (decorator: per-call timeout, one retry for reads)
//! ```
//!
//! Mutating calls (`create_container`, `start`, `stop`, `restart`, `remove`)
//! are never retried; reads (`ping`, `list_containers`, `stats`, `inspect`,
//! `logs`) are retried once by [`BoundedRuntime`].

pub mod bounded;
pub mod docker;
pub mod error;
pub mod memory;
pub mod runtime;
pub mod types;

pub use bounded::{BoundedRuntime, RuntimeTimeouts};
pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::{InMemoryRuntime, Operation};
pub use runtime::ContainerRuntime;
pub use types::*;
