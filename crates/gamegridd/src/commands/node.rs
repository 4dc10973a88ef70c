use clap::Subcommand;

use gamegrid_registry::{NewNode, NodeFilter, NodeUpdate};
use gamegrid_state::{ConnectionConfig, GeoPoint, NodeStatus, ResourceVector};

use crate::app::App;
use crate::commands::{cpu_millis, kinded, parse_point, print_json};

#[derive(Debug, Subcommand)]
pub enum NodeAction {
    /// Register a node and probe it once.
    Add {
        /// Unique node name.
        name: String,
        #[arg(long)]
        location: String,
        /// Explicit coordinates as `lat,lon`.
        #[arg(long, value_parser = parse_point)]
        coordinates: Option<GeoPoint>,
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "2375")]
        port: u16,
        #[arg(long, env = "GAMEGRID_NODE_API_KEY", hide_env_values = true)]
        api_key: String,
        /// Total CPU in cores.
        #[arg(long)]
        cpu: f64,
        #[arg(long)]
        ram_mb: u64,
        #[arg(long)]
        storage_gb: u64,
    },
    /// List nodes.
    List {
        #[arg(long)]
        status: Option<NodeStatus>,
        #[arg(long)]
        location: Option<String>,
    },
    Get {
        id: String,
    },
    /// Probe one node, or every node when no id is given.
    Probe {
        id: Option<String>,
    },
    /// Edit a node; unset flags are left unchanged. Probes afterwards.
    Update {
        id: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long, value_parser = parse_point, conflicts_with = "clear_coordinates")]
        coordinates: Option<GeoPoint>,
        #[arg(long)]
        clear_coordinates: bool,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        cpu: Option<f64>,
        #[arg(long)]
        ram_mb: Option<u64>,
        #[arg(long)]
        storage_gb: Option<u64>,
    },
    /// Take a node out of placement.
    Maintenance {
        id: String,
    },
    /// Probe and mark online if the node answers.
    Online {
        id: String,
    },
    /// Remove a node that hosts no workloads.
    Delete {
        id: String,
    },
}

pub async fn handle(app: &App, action: NodeAction) -> anyhow::Result<()> {
    let plane = &app.plane;
    match action {
        NodeAction::Add {
            name,
            location,
            coordinates,
            host,
            port,
            api_key,
            cpu,
            ram_mb,
            storage_gb,
        } => {
            let new = NewNode {
                name,
                location,
                coordinates,
                connection: ConnectionConfig { host, port, api_key },
                totals: ResourceVector::new(cpu_millis(cpu)?, ram_mb, storage_gb),
            };
            let registration = plane.register_node(new).await.map_err(kinded)?;
            print_json(&registration)
        }
        NodeAction::List { status, location } => {
            let nodes = plane
                .list_nodes(&NodeFilter { status, location })
                .map_err(kinded)?;
            print_json(&nodes)
        }
        NodeAction::Get { id } => print_json(&plane.get_node(&id).map_err(kinded)?),
        NodeAction::Probe { id: Some(id) } => print_json(&plane.probe_node(&id).await.map_err(kinded)?),
        NodeAction::Probe { id: None } => print_json(&plane.probe_all().await.map_err(kinded)?),
        NodeAction::Update {
            id,
            location,
            coordinates,
            clear_coordinates,
            host,
            port,
            api_key,
            cpu,
            ram_mb,
            storage_gb,
        } => {
            let current = plane.get_node(&id).map_err(kinded)?;

            let connection = (host.is_some() || port.is_some() || api_key.is_some()).then(|| ConnectionConfig {
                host: host.unwrap_or_else(|| current.connection.host.clone()),
                port: port.unwrap_or(current.connection.port),
                api_key: api_key.unwrap_or_else(|| current.connection.api_key.clone()),
            });

            let totals = if cpu.is_some() || ram_mb.is_some() || storage_gb.is_some() {
                let now = current.capacity.totals();
                Some(ResourceVector::new(
                    cpu.map(cpu_millis).transpose()?.unwrap_or(now.cpu_millis),
                    ram_mb.unwrap_or(now.ram_mb),
                    storage_gb.unwrap_or(now.storage_gb),
                ))
            } else {
                None
            };

            let coordinates = if clear_coordinates {
                Some(None)
            } else {
                coordinates.map(Some)
            };

            let patch = NodeUpdate {
                location,
                coordinates,
                connection,
                totals,
            };
            print_json(&plane.update_node(&id, &patch).await.map_err(kinded)?)
        }
        NodeAction::Maintenance { id } => print_json(&plane.set_maintenance(&id).map_err(kinded)?),
        NodeAction::Online { id } => print_json(&plane.bring_online(&id).await.map_err(kinded)?),
        NodeAction::Delete { id } => {
            plane.delete_node(&id).map_err(kinded)?;
            println!("deleted node {id}");
            Ok(())
        }
    }
}
