//! gamegrid-state — embedded state store for GameGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for nodes, workloads, capacity reservations, and round-robin
//! placement cursors.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every read runs in its own read transaction, so callers always observe a
//! consistent snapshot. Multi-record updates (reserve capacity on a node and
//! record the reservation) go through [`StateStore::write`], which hands the
//! closure a [`StoreTxn`] and commits only if the closure succeeds.
//!
//! Nodes carry a monotonically increasing `version`; every write bumps it and
//! [`StateStore::compare_and_swap_node`] rejects stale writers.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{NodeDeletion, StateStore, StoreTxn};
pub use types::*;
