//! gamegrid.toml configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use gamegrid_health::parse_duration;
use gamegrid_lifecycle::{LifecycleSettings, TemplateOverride, WorkloadCatalog};
use gamegrid_placement::{LocationTable, PlacementStrategy};
use gamegrid_runtime::RuntimeTimeouts;
use gamegrid_state::GeoPoint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GamegridConfig {
    pub store: StoreConfig,
    pub health: HealthConfig,
    pub placement: PlacementConfig,
    pub runtime: RuntimeConfig,
    /// Location label → coordinates, used by `location_based` placement.
    pub locations: BTreeMap<String, GeoPoint>,
    /// Workload type → overrides of the built-in template.
    pub catalog: BTreeMap<String, TemplateOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// redb file. Relative paths resolve against the data directory.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gamegrid.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    pub interval: String,
    pub timeout: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    pub default_strategy: PlacementStrategy,
    pub max_attempts: u32,
    pub probe_before_reserve: bool,
    pub log_tail: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        let settings = LifecycleSettings::default();
        Self {
            default_strategy: settings.default_strategy,
            max_attempts: settings.max_attempts,
            probe_before_reserve: settings.probe_before_reserve,
            log_tail: settings.log_tail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeDriver {
    #[default]
    Docker,
    /// In-process runtime; nothing is actually started.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub driver: RuntimeDriver,
    /// Docker Engine API version prefix, e.g. `v1.43`.
    pub api_version: Option<String>,
    pub call_timeout: String,
    pub read_timeout: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            driver: RuntimeDriver::default(),
            api_version: None,
            call_timeout: "30s".to_string(),
            read_timeout: "10s".to_string(),
        }
    }
}

impl GamegridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: GamegridConfig =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given; otherwise `gamegrid.toml` in the data
    /// directory if it exists, else defaults.
    pub fn load(path: Option<&Path>, data_dir: &Path) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let candidate = data_dir.join("gamegrid.toml");
                if candidate.exists() {
                    Self::from_file(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Check every derived value once, so later accessors cannot fail on
    /// a loaded config.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.health_interval()?;
        self.health_timeout()?;
        self.runtime_timeouts()?;
        if self.placement.max_attempts == 0 {
            bail!("placement.max_attempts must be at least 1");
        }
        for (label, point) in &self.locations {
            if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lon) {
                bail!("location {label}: coordinates out of range");
            }
        }
        self.catalog()?;
        Ok(())
    }

    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            data_dir.join(&self.store.path)
        }
    }

    pub fn health_interval(&self) -> anyhow::Result<Duration> {
        duration("health.interval", &self.health.interval)
    }

    pub fn health_timeout(&self) -> anyhow::Result<Duration> {
        duration("health.timeout", &self.health.timeout)
    }

    pub fn runtime_timeouts(&self) -> anyhow::Result<RuntimeTimeouts> {
        Ok(RuntimeTimeouts {
            read: duration("runtime.read_timeout", &self.runtime.read_timeout)?,
            call: duration("runtime.call_timeout", &self.runtime.call_timeout)?,
        })
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            default_strategy: self.placement.default_strategy,
            max_attempts: self.placement.max_attempts,
            probe_before_reserve: self.placement.probe_before_reserve,
            log_tail: self.placement.log_tail,
        }
    }

    pub fn location_table(&self) -> LocationTable {
        self.locations
            .iter()
            .map(|(label, point)| (label.clone(), *point))
            .collect()
    }

    /// Built-in workload templates merged with `[catalog]`, validated.
    pub fn catalog(&self) -> anyhow::Result<WorkloadCatalog> {
        Ok(WorkloadCatalog::with_overrides(&self.catalog)?)
    }
}

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => bail!("{field}: invalid duration {value:?}"),
    }
}
