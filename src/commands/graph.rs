use anyhow::Result;
use convergence::{ResourceGraph, ResourceRef};
use serde::Serialize;
use std::path::Path;

use crate::Context;
use crate::cli::GraphArgs;
use crate::ui;

/// One resource as `graph --json` prints it
#[derive(Debug, Serialize)]
pub struct GraphEntry {
    pub step: usize,
    pub resource: ResourceRef,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    pub depends_on: Vec<ResourceRef>,
    pub notifies: Vec<ResourceRef>,
}

pub fn entries(graph: &ResourceGraph) -> Vec<GraphEntry> {
    let refs = |indices: &[usize]| -> Vec<ResourceRef> {
        indices
            .iter()
            .map(|&i| graph.get(i).reference().clone())
            .collect()
    };

    graph
        .order()
        .iter()
        .enumerate()
        .map(|(step, &index)| {
            let resource = graph.get(index);
            GraphEntry {
                step: step + 1,
                resource: resource.reference().clone(),
                description: resource.description(),
                recipe: resource.recipe().map(str::to_string),
                depends_on: refs(graph.dependencies_of(index)),
                notifies: refs(graph.notifications_of(index)),
            }
        })
        .collect()
}

pub fn run(ctx: &Context, config_path: Option<&Path>, args: GraphArgs) -> Result<()> {
    let config = super::load_config(config_path, &args.run_list)?;
    let graph = super::load_graph(&config)?;
    let entries = entries(&graph);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let mut recipe: Option<&str> = None;
    for entry in &entries {
        if entry.recipe.as_deref() != recipe {
            recipe = entry.recipe.as_deref();
            if !ctx.quiet {
                ui::section(recipe.unwrap_or("(run list)"));
            }
        }
        ui::step(entry.step, entries.len(), &entry.resource.to_string());
        if ctx.verbose > 0 {
            ui::dim(&entry.description);
        }
        for dep in &entry.depends_on {
            ui::dim(&format!("after {dep}"));
        }
        for target in &entry.notifies {
            ui::dim(&format!("notifies {target}"));
        }
    }
    Ok(())
}
