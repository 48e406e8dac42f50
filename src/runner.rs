use anyhow::{Context, Result, anyhow};
use convergence::{CancelToken, CommandOutput};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::signal;

/// How often a running child is checked against the cancel token
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Build a command, run through `sudo -n -u <user> -H --` when a user is given
pub fn command_as(user: Option<&str>, program: &str, args: &[&str]) -> Command {
    match user {
        Some(user) => {
            let mut cmd = Command::new("sudo");
            cmd.args(["-n", "-u", user, "-H", "--", program]).args(args);
            cmd
        }
        None => {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    }
}

/// Run a command to completion and capture its output
///
/// The child is killed once the run is cancelled by a signal.
pub fn output(cmd: &mut Command) -> Result<CommandOutput> {
    output_until(cmd, signal::token().as_ref())
}

/// Run a command, killing it when `cancel` fires before it exits
pub fn output_until(cmd: &mut Command, cancel: Option<&CancelToken>) -> Result<CommandOutput> {
    log::debug!("exec {cmd:?}");
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute: {}", describe(cmd)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).map(|_| buf)
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).map(|_| buf)
    });

    let status = loop {
        if let Some(status) = child
            .wait_timeout(POLL_INTERVAL)
            .context("Failed to wait for command")?
        {
            break status;
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            log::warn!("Cancelled, terminating {}", describe(cmd));
            break terminate(&mut child)?;
        }
    };

    Ok(Output {
        status,
        stdout: join(stdout_handle)?,
        stderr: join(stderr_handle)?,
    }
    .into())
}

/// SIGTERM (which sudo relays to its command), then SIGKILL after a grace period
fn terminate(child: &mut Child) -> Result<ExitStatus> {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) on the pid of a child we have not reaped yet
        unsafe { libc::kill(pid, libc::SIGTERM) };
    }
    if let Some(status) = child
        .wait_timeout(TERMINATE_GRACE)
        .context("Failed to wait for command")?
    {
        return Ok(status);
    }
    child.kill().context("Failed to kill command")?;
    child.wait().context("Failed to wait for killed command")
}

fn join(handle: thread::JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
        .context("Failed to read command output")
}

/// Run a program and capture its output
pub fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
    output(Command::new(program).args(args))
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}
