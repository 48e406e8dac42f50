//! Commands
//!
//! - `apply` - converge the host to the run list
//! - `plan` - evaluate guards only and show what apply would do
//! - `graph` - print the resources in execution order

pub mod apply;
pub mod graph;
pub mod plan;

use anyhow::{Context as AnyhowContext, Result, bail};
use convergence::{
    EnvironmentMapping, ExecutionOutcome, GraphBuilder, OutcomeStatus, ProgressCallback, Resource,
    ResourceGraph,
};
use std::path::Path;

use crate::Context;
use crate::cli::RunListArgs;
use crate::config::RunConfig;
use crate::recipe::DirectoryRecipes;
use crate::ui;

/// Load the configuration with command-line overrides applied
pub fn load_config(config_path: Option<&Path>, args: &RunListArgs) -> Result<RunConfig> {
    let mut config = RunConfig::load(config_path)?;
    if let Some(dir) = &args.recipe_dir {
        config.recipe_dir = dir.clone();
    }
    if !args.recipes.is_empty() {
        config.run_list = args.recipes.clone();
    }
    for assignment in &args.set {
        config.set_node(assignment)?;
    }
    Ok(config)
}

/// Expand the run list into a resource graph
pub fn load_graph(config: &RunConfig) -> Result<ResourceGraph> {
    if config.run_list.is_empty() {
        bail!("Nothing to run: pass recipe names or set run_list in the configuration");
    }

    let recipes = DirectoryRecipes::new(&config.recipe_dir, config.node.clone())?;
    log::info!(
        "run list [{}] from {}",
        config.run_list.join(", "),
        recipes.dir().display()
    );

    GraphBuilder::new(&recipes)
        .build_run_list(&config.run_list)
        .context("Could not build the resource graph")
}

/// Snapshot of the invoking process environment
pub fn environment_snapshot() -> EnvironmentMapping {
    std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

/// Prints each outcome as the converger records it
pub struct CliProgress<'a> {
    ctx: &'a Context,
    total: usize,
    started: usize,
}

impl<'a> CliProgress<'a> {
    pub fn new(ctx: &'a Context, total: usize) -> Self {
        Self {
            ctx,
            total,
            started: 0,
        }
    }
}

impl ProgressCallback for CliProgress<'_> {
    fn on_resource_start(&mut self, resource: &Resource) {
        self.started += 1;
        if self.ctx.verbose > 0 && !self.ctx.quiet {
            ui::step(
                self.started.min(self.total),
                self.total,
                &resource.description(),
            );
        }
    }

    fn on_resource_complete(&mut self, outcome: &ExecutionOutcome) {
        let quiet = self.ctx.quiet && outcome.status != OutcomeStatus::Failed;
        let unchanged = outcome.status == OutcomeStatus::Unchanged && self.ctx.verbose == 0;
        if !quiet && !unchanged {
            println!("{}", ui::outcome_line(outcome));
        }
    }
}
