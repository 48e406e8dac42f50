use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Converge this host to the state declared in recipes", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Run configuration file (default: ./converge.toml, then ~/.config/converge/config.toml)
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check every resource and act where the host differs
    Apply(ApplyArgs),

    /// Show what a run would change without changing anything
    Plan(RunListArgs),

    /// Print the resources of the run list in execution order
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which recipes to run and with which node attributes
#[derive(Args, Debug, Clone, Default)]
pub struct RunListArgs {
    /// Recipes to run instead of the configured run list
    #[arg(value_name = "RECIPE")]
    pub recipes: Vec<String>,

    /// Recipe directory (overrides the configuration)
    #[arg(long, value_name = "DIR")]
    pub recipe_dir: Option<PathBuf>,

    /// Override a node attribute (repeatable), e.g. --set bizarro.reference=v1.2
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run_list: RunListArgs,

    /// Evaluate guards but do not act
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Write the JSON run report here (overrides the configuration)
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GraphArgs {
    #[command(flatten)]
    pub run_list: RunListArgs,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}
