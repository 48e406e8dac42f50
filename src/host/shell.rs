//! Shell commands for Execute resources

use crate::runner;
use anyhow::Result;
use convergence::{CommandOutput, CommandRunner, CommandSpec};
use std::process::Command;

#[derive(Debug, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = build(spec);
        let output = runner::output(&mut cmd)?;
        if !output.stdout.is_empty() {
            log::debug!("{}", output.stdout_str().trim_end());
        }
        Ok(output)
    }
}

fn search_path(spec: &CommandSpec) -> Option<String> {
    if spec.path.is_empty() {
        return None;
    }
    Some(
        spec.path
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Build the process for a command spec
///
/// With an effective user the command goes through `sudo`, and the
/// environment is passed through `env` since sudo resets it.
fn build(spec: &CommandSpec) -> Command {
    let shell = spec.interpreter.program();

    let mut cmd = match &spec.user {
        Some(user) => {
            let mut assignments: Vec<String> = spec
                .environment
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if let Some(path) = search_path(spec) {
                assignments.push(format!("PATH={path}"));
            }

            let mut cmd = runner::command_as(Some(user.as_str()), "env", &[]);
            cmd.args(assignments).args([shell, "-c", spec.command.as_str()]);
            cmd
        }
        None => {
            let mut cmd = Command::new(shell);
            cmd.args(["-c", spec.command.as_str()]).envs(&spec.environment);
            if let Some(path) = search_path(spec) {
                cmd.env("PATH", path);
            }
            cmd
        }
    };

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}
