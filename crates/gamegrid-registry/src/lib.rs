//! gamegrid-registry — the set of hosts available to run workloads.
//!
//! The [`NodeRegistry`] validates and persists node records, answers
//! filtered listings, and owns every status transition that is not driven
//! by capacity accounting:
//!
//! ```text
//!   create ──► offline ──(probe ok)──► online
//!                 ▲                      │
//!                 └──────(probe fail)────┘
//!   set_maintenance ──► maintenance (sticky until brought online)
//! ```
//!
//! All read-modify-write updates go through a compare-and-swap on the node
//! version and are retried on conflict.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{NewNode, NodeFilter, NodeRegistry, NodeUpdate};
