//! gamegrid-placement — choose a node for a resource request.
//!
//! Placement reads the same node counters the ledger mutates, filters to
//! online nodes with enough free capacity for every resource kind, and
//! applies one of three strategies:
//!
//! - **`round_robin`**: cycle through the id-sorted candidates using a
//!   cursor persisted per (strategy, resource class)
//! - **`least_loaded`**: minimum weighted load `0.4·cpu + 0.4·ram + 0.2·storage`
//! - **`location_based`**: minimum great-circle distance to a hint,
//!   falling back to `least_loaded` when the hint is absent or unknown
//!
//! Selection never reserves capacity; the caller reserves immediately after
//! and re-runs placement if the reservation is refused.

pub mod engine;
pub mod error;
pub mod geo;
pub mod load;
pub mod strategy;

pub use engine::PlacementEngine;
pub use error::{PlacementError, PlacementResult};
pub use geo::{LocationTable, haversine_km};
pub use load::{LoadWeights, weighted_load};
pub use strategy::{LocationHint, PlacementDecision, PlacementFallback, PlacementRequest, PlacementStrategy};
