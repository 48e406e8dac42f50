//! The local machine behind the engine's collaborator traits

mod accounts;
mod apt;
mod export;
mod fs;
mod git;
mod service;
mod shell;

pub use accounts::SystemAccounts;
pub use apt::AptPackages;
pub use export::ProcfileRenderer;
pub use fs::LocalFileSystem;
pub use git::GitCli;
pub use service::InitServices;
pub use shell::ShellRunner;

use convergence::{ApplyContext, EnvironmentMapping};

/// A Debian-family host
#[derive(Debug, Default)]
pub struct LocalHost {
    packages: AptPackages,
    accounts: SystemAccounts,
    fs: LocalFileSystem,
    services: InitServices,
    commands: ShellRunner,
    sources: GitCli,
    renderer: ProcfileRenderer,
}

impl LocalHost {
    pub fn new() -> Self {
        let accounts = SystemAccounts::default();
        Self {
            fs: LocalFileSystem::new(accounts.clone()),
            accounts,
            ..Default::default()
        }
    }

    pub fn context<'a>(&'a self, environment: &'a EnvironmentMapping) -> ApplyContext<'a> {
        ApplyContext {
            packages: &self.packages,
            accounts: &self.accounts,
            fs: &self.fs,
            services: &self.services,
            commands: &self.commands,
            sources: &self.sources,
            renderer: &self.renderer,
            environment,
        }
    }
}
