//! Weighted node load.

use serde::{Deserialize, Serialize};

use gamegrid_state::NodeCapacity;

/// Per-resource weights of the load score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadWeights {
    pub cpu: f64,
    pub ram: f64,
    pub storage: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            cpu: 0.4,
            ram: 0.4,
            storage: 0.2,
        }
    }
}

/// Weighted utilization of a node in `0.0..=1.0` for normalized weights.
pub fn weighted_load(capacity: &NodeCapacity, weights: &LoadWeights) -> f64 {
    weights.cpu * capacity.cpu.utilization()
        + weights.ram * capacity.ram.utilization()
        + weights.storage * capacity.storage.utilization()
}
