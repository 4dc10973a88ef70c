use clap::Subcommand;

use gamegrid_lifecycle::{ControlAction, WorkloadSpec};

use crate::app::App;
use crate::commands::{ResourceArgs, StrategyArgs, kinded, print_json};

#[derive(Debug, Subcommand)]
pub enum WorkloadAction {
    /// Place, reserve and provision a new workload.
    Create {
        name: String,
        #[arg(long)]
        owner: String,
        /// minecraft, valheim, csgo, rust or ark.
        #[arg(long = "type")]
        kind: String,
        #[command(flatten)]
        resources: ResourceArgs,
        #[arg(long)]
        max_players: Option<u32>,
        #[arg(long)]
        auto_restart: bool,
        #[command(flatten)]
        placement: StrategyArgs,
    },
    List,
    Get {
        id: String,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
    },
    Restart {
        id: String,
    },
    /// Stop, remove the container and release capacity.
    Delete {
        id: String,
    },
    Logs {
        id: String,
        /// Number of lines (default from config).
        #[arg(long)]
        tail: Option<usize>,
    },
    Stats {
        id: String,
    },
    /// Retry provisioning of a workload whose create failed.
    Reprovision {
        id: String,
        #[command(flatten)]
        placement: StrategyArgs,
    },
}

pub async fn handle(app: &App, action: WorkloadAction) -> anyhow::Result<()> {
    let plane = &app.plane;
    match action {
        WorkloadAction::Create {
            name,
            owner,
            kind,
            resources,
            max_players,
            auto_restart,
            placement,
        } => {
            let spec = WorkloadSpec {
                name,
                owner,
                kind,
                resources: resources.vector()?,
                max_players,
                auto_restart,
                strategy: placement.strategy,
                hint: placement.hint(),
            };
            print_json(&plane.create_workload(spec).await.map_err(kinded)?)
        }
        WorkloadAction::List => print_json(&plane.list_workloads().map_err(kinded)?),
        WorkloadAction::Get { id } => print_json(&plane.get_workload(&id).map_err(kinded)?),
        WorkloadAction::Start { id } => control(app, &id, ControlAction::Start).await,
        WorkloadAction::Stop { id } => control(app, &id, ControlAction::Stop).await,
        WorkloadAction::Restart { id } => control(app, &id, ControlAction::Restart).await,
        WorkloadAction::Delete { id } => control(app, &id, ControlAction::Delete).await,
        WorkloadAction::Logs { id, tail } => {
            println!("{}", plane.workload_logs(&id, tail).await.map_err(kinded)?);
            Ok(())
        }
        WorkloadAction::Stats { id } => print_json(&plane.workload_stats(&id).await.map_err(kinded)?),
        WorkloadAction::Reprovision { id, placement } => {
            let workload = plane
                .reprovision(&id, placement.strategy, placement.hint())
                .await
                .map_err(kinded)?;
            print_json(&workload)
        }
    }
}

async fn control(app: &App, id: &str, action: ControlAction) -> anyhow::Result<()> {
    match app.plane.control_workload(id, action).await.map_err(kinded)? {
        Some(workload) => print_json(&workload),
        None => {
            println!("deleted workload {id}");
            Ok(())
        }
    }
}
