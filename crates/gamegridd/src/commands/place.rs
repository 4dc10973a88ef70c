use clap::Args;

use gamegrid_placement::PlacementRequest;

use crate::app::App;
use crate::commands::{ResourceArgs, StrategyArgs, kinded, print_json};

/// Choose a node for a request without reserving anything.
#[derive(Debug, Args)]
pub struct PlaceArgs {
    #[command(flatten)]
    pub resources: ResourceArgs,
    #[command(flatten)]
    pub placement: StrategyArgs,
    /// Round-robin scope, usually the workload type.
    #[arg(long)]
    pub class: Option<String>,
}

pub fn handle(app: &App, args: PlaceArgs) -> anyhow::Result<()> {
    let strategy = args
        .placement
        .strategy
        .unwrap_or(app.plane.workloads().settings().default_strategy);
    let mut request = PlacementRequest::new(args.resources.vector()?, strategy);
    if let Some(hint) = args.placement.hint() {
        request = request.with_hint(hint);
    }
    if let Some(class) = args.class {
        request = request.with_resource_class(class);
    }
    print_json(&app.plane.place_workload(&request).map_err(kinded)?)
}
