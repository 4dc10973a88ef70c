//! Workload-type capability table.
//!
//! Maps every [`WorkloadKind`] to the image, published ports and
//! environment template used to provision it. The table is validated as a
//! whole when it is built: a missing kind, an empty image, a kind without
//! ports or an unknown `{placeholder}` is a configuration error, never a
//! silent default.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gamegrid_runtime::{ContainerSpec, PortBinding, PortProtocol};
use gamegrid_state::{Workload, WorkloadKind};

use crate::error::{LifecycleError, LifecycleResult};

/// Placeholders an env template may use.
const PLACEHOLDERS: [&str; 4] = ["{name}", "{memory_mb}", "{max_players}", "{workload_id}"];

/// A published port: `25565/tcp`, `2456/udp`, `8080:80/tcp` or a bare `27015` (tcp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec {
    pub host: u16,
    pub container: u16,
    pub protocol: PortProtocol,
}

impl PortSpec {
    pub const fn same(port: u16, protocol: PortProtocol) -> Self {
        Self {
            host: port,
            container: port,
            protocol,
        }
    }

    pub fn binding(&self) -> PortBinding {
        PortBinding {
            container_port: self.container,
            host_port: self.host,
            protocol: self.protocol,
        }
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ports, protocol) = match s.trim().split_once('/') {
            Some((ports, "tcp")) => (ports, PortProtocol::Tcp),
            Some((ports, "udp")) => (ports, PortProtocol::Udp),
            Some((_, other)) => return Err(format!("unknown port protocol: {other}")),
            None => (s.trim(), PortProtocol::Tcp),
        };
        let parse = |p: &str| {
            p.parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| format!("invalid port: {p}"))
        };
        let (host, container) = match ports.split_once(':') {
            Some((host, container)) => (parse(host)?, parse(container)?),
            None => {
                let port = parse(ports)?;
                (port, port)
            }
        };
        Ok(Self {
            host,
            container,
            protocol,
        })
    }
}

impl TryFrom<String> for PortSpec {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortSpec> for String {
    fn from(p: PortSpec) -> Self {
        p.to_string()
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.container {
            write!(f, "{}/{}", self.container, self.protocol)
        } else {
            write!(f, "{}:{}/{}", self.host, self.container, self.protocol)
        }
    }
}

/// How to provision one workload type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadTemplate {
    pub image: String,
    pub ports: Vec<PortSpec>,
    /// `KEY=value` entries; may contain placeholders.
    pub env: Vec<String>,
    /// Used for `{max_players}` when the workload does not set one.
    pub default_max_players: u32,
}

/// Config-file override of a template. Unset fields keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateOverride {
    pub image: Option<String>,
    pub ports: Option<Vec<PortSpec>>,
    pub env: Option<Vec<String>>,
    pub default_max_players: Option<u32>,
}

/// Validated capability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCatalog {
    templates: BTreeMap<WorkloadKind, WorkloadTemplate>,
}

impl WorkloadCatalog {
    /// The built-in table covering every workload type.
    pub fn builtin() -> Self {
        use PortProtocol::{Tcp, Udp};

        let template = |image: &str, ports: &[PortSpec], env: &[&str], players: u32| WorkloadTemplate {
            image: image.to_string(),
            ports: ports.to_vec(),
            env: env.iter().map(|e| e.to_string()).collect(),
            default_max_players: players,
        };

        let templates = WorkloadKind::ALL
            .into_iter()
            .map(|kind| {
                let t = match kind {
                    WorkloadKind::Minecraft => template(
                        "itzg/minecraft-server:latest",
                        &[PortSpec::same(25565, Tcp)],
                        &["EULA=TRUE", "TYPE=PAPER", "MEMORY={memory_mb}M", "MAX_PLAYERS={max_players}"],
                        20,
                    ),
                    WorkloadKind::Valheim => template(
                        "lloesche/valheim-server:latest",
                        &[PortSpec::same(2456, Udp), PortSpec::same(2457, Udp)],
                        &["SERVER_NAME={name}", "WORLD_NAME=Dedicated", "SERVER_PUBLIC=false"],
                        10,
                    ),
                    WorkloadKind::Csgo => template(
                        "cm2network/csgo:latest",
                        &[PortSpec::same(27015, Tcp), PortSpec::same(27015, Udp)],
                        &["SRCDS_HOSTNAME={name}", "SRCDS_MAXPLAYERS={max_players}"],
                        16,
                    ),
                    WorkloadKind::Rust => template(
                        "didstopia/rust-server:latest",
                        &[PortSpec::same(28015, Udp), PortSpec::same(28016, Tcp)],
                        &["RUST_SERVER_NAME={name}", "RUST_SERVER_MAXPLAYERS={max_players}"],
                        50,
                    ),
                    WorkloadKind::Ark => template(
                        "hermsi/ark-server:latest",
                        &[PortSpec::same(7777, Udp), PortSpec::same(27015, Udp)],
                        &["SESSION_NAME={name}", "MAX_PLAYERS={max_players}"],
                        70,
                    ),
                };
                (kind, t)
            })
            .collect();

        Self { templates }
    }

    /// Built-in table with `overrides` applied, keyed by workload type name.
    pub fn with_overrides(overrides: &BTreeMap<String, TemplateOverride>) -> LifecycleResult<Self> {
        let mut catalog = Self::builtin();
        for (name, patch) in overrides {
            let kind: WorkloadKind = name
                .parse()
                .map_err(|e| LifecycleError::Validation(format!("catalog: {e}")))?;
            if let Some(template) = catalog.templates.get_mut(&kind) {
                if let Some(image) = &patch.image {
                    template.image = image.clone();
                }
                if let Some(ports) = &patch.ports {
                    template.ports = ports.clone();
                }
                if let Some(env) = &patch.env {
                    template.env = env.clone();
                }
                if let Some(players) = patch.default_max_players {
                    template.default_max_players = players;
                }
            }
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check every workload type has a complete template.
    pub fn validate(&self) -> LifecycleResult<()> {
        for kind in WorkloadKind::ALL {
            let template = self
                .templates
                .get(&kind)
                .ok_or_else(|| LifecycleError::Validation(format!("catalog: no template for {kind}")))?;
            if template.image.trim().is_empty() {
                return Err(LifecycleError::Validation(format!("catalog: {kind} has no image")));
            }
            if template.ports.is_empty() {
                return Err(LifecycleError::Validation(format!("catalog: {kind} has no ports")));
            }
            if template.default_max_players == 0 {
                return Err(LifecycleError::Validation(format!(
                    "catalog: {kind} default_max_players must be positive"
                )));
            }
            for entry in &template.env {
                if !entry.contains('=') {
                    return Err(LifecycleError::Validation(format!(
                        "catalog: {kind} env entry {entry:?} is not KEY=value"
                    )));
                }
                if let Some(unknown) = unknown_placeholder(entry) {
                    return Err(LifecycleError::Validation(format!(
                        "catalog: {kind} env entry uses unknown placeholder {unknown}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: WorkloadKind) -> LifecycleResult<&WorkloadTemplate> {
        self.templates
            .get(&kind)
            .ok_or_else(|| LifecycleError::Validation(format!("no template for workload type {kind}")))
    }

    /// Build the container spec for a workload.
    pub fn render(&self, workload: &Workload) -> LifecycleResult<ContainerSpec> {
        let template = self.get(workload.kind)?;
        let max_players = workload.max_players.unwrap_or(template.default_max_players);

        let env = template
            .env
            .iter()
            .map(|entry| {
                entry
                    .replace("{name}", &workload.name)
                    .replace("{memory_mb}", &workload.resources.ram_mb.to_string())
                    .replace("{max_players}", &max_players.to_string())
                    .replace("{workload_id}", &workload.id)
            })
            .collect();

        let labels = BTreeMap::from([
            ("gamegrid.workload".to_string(), workload.id.clone()),
            ("gamegrid.owner".to_string(), workload.owner.clone()),
            ("gamegrid.kind".to_string(), workload.kind.to_string()),
        ]);

        Ok(ContainerSpec {
            name: container_name(&workload.id),
            image: template.image.clone(),
            env,
            ports: template.ports.iter().map(PortSpec::binding).collect(),
            volumes: vec![format!("/data/servers/{}:/data", workload.id)],
            labels,
            memory_limit_mb: Some(workload.resources.ram_mb),
            cpu_millis: Some(workload.resources.cpu_millis),
            auto_restart: workload.auto_restart,
        })
    }
}

impl Default for WorkloadCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn container_name(workload_id: &str) -> String {
    format!("server-{workload_id}")
}

/// First `{...}` token in `entry` that is not a known placeholder.
fn unknown_placeholder(entry: &str) -> Option<&str> {
    let mut rest = entry;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start..];
        let end = tail.find('}')?;
        let token = &tail[..=end];
        if !PLACEHOLDERS.contains(&token) {
            return Some(token);
        }
        rest = &tail[end + 1..];
    }
    None
}
