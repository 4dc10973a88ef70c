//! redb table definitions for the GameGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types),
//! except the cursor table which stores the last assigned node id as a plain string.

use redb::TableDefinition;

/// Node records keyed by node id (the node's unique name).
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Workload records keyed by workload id.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Live capacity reservations keyed by reservation id.
pub const RESERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("reservations");

/// Round-robin cursors keyed by `{strategy}:{resource_class}`.
pub const CURSORS: TableDefinition<&str, &str> = TableDefinition::new("placement_cursors");
