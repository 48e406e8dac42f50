//! Services through the `service` wrapper (sysvinit, upstart or systemd)

use crate::runner;
use anyhow::Result;
use convergence::{CommandOutput, ServiceState, ServiceSupervisor};

#[derive(Debug, Default)]
pub struct InitServices;

impl InitServices {
    fn service(&self, name: &str, verb: &str) -> Result<CommandOutput> {
        runner::run("service", &[name, verb])
    }
}

impl ServiceSupervisor for InitServices {
    fn state(&self, name: &str) -> Result<ServiceState> {
        let output = self.service(name, "status")?;
        Ok(classify_status(output.code, &output.stdout_str()))
    }

    fn start(&self, name: &str) -> Result<CommandOutput> {
        self.service(name, "start")
    }

    fn stop(&self, name: &str) -> Result<CommandOutput> {
        self.service(name, "stop")
    }

    fn restart(&self, name: &str) -> Result<CommandOutput> {
        self.service(name, "restart")
    }
}

/// Interpret `service <name> status`
///
/// LSB scripts exit 0 when running and 3 when stopped. Upstart jobs exit 0
/// either way and print `<job> start/running` or `<job> stop/waiting`.
fn classify_status(code: Option<i32>, stdout: &str) -> ServiceState {
    match code {
        Some(0) if stdout.contains("stop/waiting") => ServiceState::Stopped,
        Some(0) => ServiceState::Running,
        Some(3) => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    }
}
