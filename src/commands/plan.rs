use anyhow::Result;
use std::path::Path;

use crate::Context;
use crate::cli::{ApplyArgs, RunListArgs};

/// A dry run: guards are evaluated against the host, actions never run
pub fn run(ctx: &Context, config_path: Option<&Path>, args: RunListArgs) -> Result<()> {
    super::apply::run(
        ctx,
        config_path,
        ApplyArgs {
            run_list: args,
            dry_run: true,
            report: None,
        },
    )
}
