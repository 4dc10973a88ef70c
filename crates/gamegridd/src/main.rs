//! gamegridd — the GameGrid control plane binary.
//!
//! Assembles the control-plane core:
//! - State store (redb)
//! - Container runtime client (Docker Engine API, or in-memory)
//! - Node registry, health prober and monitor
//! - Resource ledger and placement engine
//! - Workload lifecycle controller
//!
//! # Usage
//!
//! ```text
//! gamegridd --data-dir /var/lib/gamegrid run
//! gamegridd node add dub-1 --location eu-west --host 10.0.0.4 --cpu 16 --ram-mb 65536 --storage-gb 500
//! gamegridd workload create friday --owner u-1 --type minecraft --cpu 2 --ram-mb 4096 --storage-gb 20
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod config;

use app::App;
use commands::node::NodeAction;
use commands::place::PlaceArgs;
use commands::workload::WorkloadAction;
use config::GamegridConfig;

const DEFAULT_LOG_FILTER: &str = "info,gamegridd=debug,gamegrid=debug";

#[derive(Parser)]
#[command(
    name = "gamegridd",
    about = "GameGrid — game-server hosting control plane",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: <data-dir>/gamegrid.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = "/var/lib/gamegrid")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the health monitor until interrupted.
    Run,
    /// Manage nodes.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Manage workloads.
    Workload {
        #[command(subcommand)]
        action: WorkloadAction,
    },
    /// Show where a request would be placed.
    Place(PlaceArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = GamegridConfig::load(cli.config.as_deref(), &cli.data_dir)?;
    let app = App::open(&config, &cli.data_dir)?;
    app.recover().await?;

    match cli.command {
        Command::Run => commands::run::run(app).await,
        Command::Node { action } => {
            let result = commands::node::handle(&app, action).await;
            app.shutdown().await;
            result
        }
        Command::Workload { action } => {
            let result = commands::workload::handle(&app, action).await;
            app.shutdown().await;
            result
        }
        Command::Place(args) => {
            let result = commands::place::handle(&app, args);
            app.shutdown().await;
            result
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
