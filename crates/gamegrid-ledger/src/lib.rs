//! gamegrid-ledger — authoritative capacity accounting per node.
//!
//! A reservation moves capacity from *free* to *used* on one node; releasing
//! it moves the capacity back. Both run inside a single state-store write
//! transaction, which is the serialization point for a node's counters:
//! two concurrent reservations can never both observe the same free
//! capacity.
//!
//! The ledger also owns reconciliation. After a successful probe the node's
//! `used` counters are set to `min(total, max(measured, committed))`, so live
//! measurements can raise usage but never erase a reservation.

pub mod error;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{MeasuredUsage, ResourceLedger};
