pub mod node;
pub mod place;
pub mod run;
pub mod workload;

use clap::Args;
use serde::Serialize;

use gamegrid_lifecycle::ControlPlaneError;
use gamegrid_placement::{LocationHint, PlacementStrategy};
use gamegrid_state::{GeoPoint, ResourceVector};

/// Resource request flags shared by `workload create` and `place`.
#[derive(Debug, Args)]
pub struct ResourceArgs {
    /// CPU in cores (fractions allowed, e.g. 0.5).
    #[arg(long)]
    pub cpu: f64,
    #[arg(long)]
    pub ram_mb: u64,
    #[arg(long)]
    pub storage_gb: u64,
}

impl ResourceArgs {
    pub fn vector(&self) -> anyhow::Result<ResourceVector> {
        Ok(ResourceVector::new(cpu_millis(self.cpu)?, self.ram_mb, self.storage_gb))
    }
}

/// Placement flags shared by `workload create`, `workload reprovision` and `place`.
#[derive(Debug, Args)]
pub struct StrategyArgs {
    /// round_robin, least_loaded or location_based.
    #[arg(long)]
    pub strategy: Option<PlacementStrategy>,
    /// Location label to place near.
    #[arg(long, conflicts_with = "near_point")]
    pub near: Option<String>,
    /// Coordinates to place near, as `lat,lon`.
    #[arg(long, value_parser = parse_point)]
    pub near_point: Option<GeoPoint>,
}

impl StrategyArgs {
    pub fn hint(&self) -> Option<LocationHint> {
        match (&self.near, self.near_point) {
            (Some(label), _) => Some(LocationHint::Label(label.clone())),
            (None, Some(point)) => Some(LocationHint::Point(point)),
            (None, None) => None,
        }
    }
}

pub fn cpu_millis(cores: f64) -> anyhow::Result<u64> {
    if !cores.is_finite() || cores < 0.0 {
        anyhow::bail!("invalid cpu value: {cores}");
    }
    Ok((cores * 1000.0).round() as u64)
}

pub fn parse_point(s: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected lat,lon: {s}"))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("invalid latitude: {lat}"))?;
    let lon: f64 = lon.trim().parse().map_err(|_| format!("invalid longitude: {lon}"))?;
    Ok(GeoPoint { lat, lon })
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prefix the error with its kind so scripts can match on it.
pub fn kinded(e: ControlPlaneError) -> anyhow::Error {
    anyhow::anyhow!("[{}] {e}", e.kind())
}
