use anyhow::{Result, bail};
use convergence::{Converger, ExecutionOutcome, RunOptions, RunReport, RunStatus};
use std::path::Path;

use super::CliProgress;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::host::LocalHost;
use crate::{report, signal, ui};

pub fn run(ctx: &Context, config_path: Option<&Path>, args: ApplyArgs) -> Result<()> {
    let config = super::load_config(config_path, &args.run_list)?;
    let graph = super::load_graph(&config)?;

    if !ctx.quiet {
        ui::header(if args.dry_run {
            "Planning Run"
        } else {
            "Converging Host"
        });
        ui::kv("run list", &config.run_list.join(", "));
        ui::kv("resources", &graph.len().to_string());
        if args.dry_run {
            ui::warn("Dry run - no changes will be made");
        }
        println!();
    }

    let host = LocalHost::new();
    let environment = super::environment_snapshot();
    let apply_ctx = host.context(&environment);
    let cancel = signal::install()?;

    let converger = Converger::new(&apply_ctx)
        .with_options(RunOptions {
            dry_run: args.dry_run,
        })
        .with_cancel_token(cancel);
    let report = converger.run(&graph, &mut CliProgress::new(ctx, graph.len()));

    if let Some(path) = args.report.as_ref().or(config.report.as_ref()) {
        report::write(&report, path)?;
    }

    print_summary(ctx, &report);

    if report.status == RunStatus::Aborted {
        if report.cancelled {
            bail!("Run cancelled");
        }
        bail!(
            "Run aborted after {} failed resource(s)",
            report.summary().failed
        );
    }
    Ok(())
}

/// Dry-run entries, including those whose guard error was absorbed
fn would_change(outcomes: &[ExecutionOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| {
            o.detail
                .as_deref()
                .is_some_and(|d| d.starts_with(convergence::DRY_RUN_DETAIL))
        })
        .count()
}

fn print_summary(ctx: &Context, report: &RunReport) {
    let summary = report.summary();
    let duration = report
        .duration()
        .to_std()
        .map(ui::format_duration)
        .unwrap_or_default();

    println!();
    match report.status {
        RunStatus::CompletedClean if !ctx.quiet => {
            ui::success(&format!("Run complete in {duration}"));
        }
        RunStatus::CompletedClean => {}
        RunStatus::CompletedWithFailures => {
            ui::warn(&format!("Run complete with accepted failures in {duration}"));
        }
        RunStatus::Aborted if report.cancelled => ui::error("Run cancelled"),
        RunStatus::Aborted => ui::error("Run aborted"),
    }

    if !ctx.quiet {
        ui::dim(&ui::summary_line(summary));
        if report.dry_run && summary.skipped > 0 {
            ui::info(&format!(
                "{} resource(s) would change",
                would_change(report.outcomes())
            ));
        }
    }
}
