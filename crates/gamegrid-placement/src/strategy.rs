//! Placement requests, strategies and decisions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gamegrid_state::{GeoPoint, NodeId, ResourceVector};

use crate::error::PlacementError;

/// Policy used to choose among capacity-sufficient online nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    RoundRobin,
    #[default]
    LeastLoaded,
    LocationBased,
}

impl PlacementStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStrategy::RoundRobin => "round_robin",
            PlacementStrategy::LeastLoaded => "least_loaded",
            PlacementStrategy::LocationBased => "location_based",
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementStrategy {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(PlacementStrategy::RoundRobin),
            "least_loaded" => Ok(PlacementStrategy::LeastLoaded),
            "location_based" => Ok(PlacementStrategy::LocationBased),
            other => Err(PlacementError::Validation(format!(
                "unknown placement strategy: {other}"
            ))),
        }
    }
}

/// Where the caller would like the workload to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationHint {
    /// A label resolved through the location table.
    Label(String),
    Point(GeoPoint),
}

/// An ephemeral placement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub resources: ResourceVector,
    pub strategy: PlacementStrategy,
    pub hint: Option<LocationHint>,
    /// Scope of the round-robin cursor, usually the workload type.
    pub resource_class: Option<String>,
}

impl PlacementRequest {
    pub fn new(resources: ResourceVector, strategy: PlacementStrategy) -> Self {
        Self {
            resources,
            strategy,
            hint: None,
            resource_class: None,
        }
    }

    pub fn with_hint(mut self, hint: LocationHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn with_resource_class(mut self, class: impl Into<String>) -> Self {
        self.resource_class = Some(class.into());
        self
    }

    /// Key of the persisted round-robin cursor for this request.
    pub fn cursor_key(&self) -> String {
        format!(
            "{}:{}",
            self.strategy,
            self.resource_class.as_deref().unwrap_or("any")
        )
    }
}

/// Why `location_based` fell back to `least_loaded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementFallback {
    MissingHint,
    UnknownLocation(String),
}

impl fmt::Display for PlacementFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementFallback::MissingHint => f.write_str("no location hint"),
            PlacementFallback::UnknownLocation(label) => write!(f, "unknown location {label}"),
        }
    }
}

/// The node chosen for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub node_id: NodeId,
    /// Strategy the caller asked for.
    pub requested: PlacementStrategy,
    /// Strategy that actually chose the node.
    pub applied: PlacementStrategy,
    pub fallback: Option<PlacementFallback>,
    /// Weighted load of the node at selection time.
    pub load: f64,
    /// Distance to the hint, for location-based picks of located nodes.
    pub distance_km: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_snake_case() {
        for s in [
            PlacementStrategy::RoundRobin,
            PlacementStrategy::LeastLoaded,
            PlacementStrategy::LocationBased,
        ] {
            assert_eq!(s.as_str().parse::<PlacementStrategy>().unwrap(), s);
        }
        assert!("random".parse::<PlacementStrategy>().is_err());
    }

    #[test]
    fn cursor_key_defaults_to_any() {
        let req = PlacementRequest::new(ResourceVector::ZERO, PlacementStrategy::RoundRobin);
        assert_eq!(req.cursor_key(), "round_robin:any");
        assert_eq!(req.with_resource_class("minecraft").cursor_key(), "round_robin:minecraft");
    }
}
