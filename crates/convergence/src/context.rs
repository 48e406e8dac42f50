//! Apply context and collaborator traits
//!
//! The engine never talks to the host directly. Every read and write goes
//! through one of the narrow traits below, so the same converger drives a
//! real machine (see the `converge` binary) or an in-memory host in tests.

use crate::environment::EnvironmentMapping;
use crate::properties::{AccountId, Interpreter, Mode, UnitFormat};
use crate::report::ExecutionOutcome;
use crate::resource::Resource;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;

/// Output from a collaborator command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl CommandOutput {
    /// Output with just an exit code
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

// ============================================================================
// Packages
// ============================================================================

pub trait PackageManager {
    /// Whether the package is installed (at `version`, when given)
    fn is_installed(&self, name: &str, version: Option<&str>) -> Result<bool>;

    fn install(&self, name: &str, version: Option<&str>) -> Result<CommandOutput>;

    fn remove(&self, name: &str) -> Result<CommandOutput>;
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    /// Name of the primary group, when it resolves
    pub group: Option<String>,
    pub home: PathBuf,
    pub shell: PathBuf,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub name: String,
    pub uid: Option<u32>,
    pub gid: Option<AccountId>,
    pub home: Option<PathBuf>,
    pub shell: Option<PathBuf>,
    pub comment: Option<String>,
    pub manage_home: bool,
}

pub trait AccountManager {
    fn group(&self, name: &str) -> Result<Option<GroupInfo>>;

    fn account(&self, name: &str) -> Result<Option<AccountInfo>>;

    /// Create the group, or bring an existing one in line with `spec`
    fn create_or_update_group(&self, spec: &GroupSpec) -> Result<CommandOutput>;

    /// Create the account, or bring an existing one in line with `spec`
    fn create_or_update_account(&self, spec: &AccountSpec) -> Result<CommandOutput>;
}

// ============================================================================
// File system
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Other,
}

/// What `stat` reports about a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub entry_type: EntryType,
    /// Owner name; `None` when the uid has no account
    pub owner: Option<String>,
    pub group: Option<String>,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits (`0o7777` mask)
    pub mode: u32,
}

/// Requested owner, group and permission bits; `None` leaves as is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,
}

impl Ownership {
    /// Whether existing metadata already matches every requested field
    pub fn is_satisfied_by(&self, meta: &Metadata) -> bool {
        let owner_ok = self
            .owner
            .as_deref()
            .is_none_or(|o| id_matches(o, meta.owner.as_deref(), meta.uid));
        let group_ok = self
            .group
            .as_deref()
            .is_none_or(|g| id_matches(g, meta.group.as_deref(), meta.gid));
        let mode_ok = self
            .mode
            .is_none_or(|m| meta.mode & Mode::MAX == m.bits());
        owner_ok && group_ok && mode_ok
    }
}

/// A numeric owner or group is compared by id, anything else by name
fn id_matches(declared: &str, name: Option<&str>, id: u32) -> bool {
    match declared.parse::<u32>() {
        Ok(wanted) => wanted == id,
        Err(_) => name == Some(declared),
    }
}

pub trait FileSystem {
    /// Metadata of the path itself (symlinks are not followed); `None` if absent
    fn stat(&self, path: &Path) -> Result<Option<Metadata>>;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace the file's content and apply ownership
    fn write(&self, path: &Path, content: &[u8], ownership: &Ownership) -> Result<()>;

    /// Create a directory (and parents when `recursive`) and apply ownership
    fn create_dir(
        &self,
        path: &Path,
        recursive: bool,
        ownership: &Ownership,
    ) -> Result<()>;

    fn set_ownership(&self, path: &Path, ownership: &Ownership) -> Result<()>;

    /// Remove a file or directory; `recursive` removes a whole subtree
    fn remove(&self, path: &Path, recursive: bool) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    Unknown,
}

pub trait ServiceSupervisor {
    fn state(&self, name: &str) -> Result<ServiceState>;

    fn start(&self, name: &str) -> Result<CommandOutput>;

    fn stop(&self, name: &str) -> Result<CommandOutput>;

    fn restart(&self, name: &str) -> Result<CommandOutput>;
}

// ============================================================================
// Commands
// ============================================================================

/// A shell command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub interpreter: Interpreter,
    pub cwd: Option<PathBuf>,
    /// Effective user
    pub user: Option<String>,
    /// Replacement search path; empty keeps the inherited PATH
    pub path: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

pub trait CommandRunner {
    /// Run to completion; there is no timeout
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

// ============================================================================
// Source control
// ============================================================================

/// State of an existing checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// URL of the `origin` remote
    pub repository: String,
    /// Commit checked out
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSpec {
    pub path: PathBuf,
    pub repository: String,
    pub reference: String,
    pub user: Option<String>,
}

pub trait SourceControl {
    /// Checkout at `path`, if there is one
    fn checkout(&self, path: &Path) -> Result<Option<Checkout>>;

    /// Commit that `reference` currently points to in `repository`
    fn resolve(&self, repository: &str, reference: &str) -> Result<String>;

    /// Clone or update so that `path` has `reference` checked out
    fn sync(&self, spec: &CheckoutSpec) -> Result<()>;
}

// ============================================================================
// Unit export
// ============================================================================

/// A process group to export as init-system units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpec {
    pub app: String,
    pub format: UnitFormat,
    pub target_dir: PathBuf,
    pub user: Option<String>,
    pub cwd: Option<PathBuf>,
    pub procfile: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedUnit {
    pub path: PathBuf,
    pub content: String,
}

pub trait UnitRenderer {
    /// Render unit files for the process group; must not write anything
    fn render(&self, spec: &ExportSpec, env: &EnvironmentMapping) -> Result<Vec<RenderedUnit>>;
}

// ============================================================================
// Context
// ============================================================================

/// Collaborators and inputs for one run
pub struct ApplyContext<'a> {
    pub packages: &'a dyn PackageManager,
    pub accounts: &'a dyn AccountManager,
    pub fs: &'a dyn FileSystem,
    pub services: &'a dyn ServiceSupervisor,
    pub commands: &'a dyn CommandRunner,
    pub sources: &'a dyn SourceControl,
    pub renderer: &'a dyn UnitRenderer,
    /// Snapshot of the invoking environment, for resources that ask for it
    pub environment: &'a EnvironmentMapping,
}

/// Progress callback for a run
///
/// Implement this trait to receive updates as the converger walks the graph.
pub trait ProgressCallback {
    /// Called before a resource's guard is evaluated
    fn on_resource_start(&mut self, resource: &Resource);

    /// Called once the outcome of a resource is recorded
    fn on_resource_complete(&mut self, outcome: &ExecutionOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_resource_start(&mut self, _resource: &Resource) {}
    fn on_resource_complete(&mut self, _outcome: &ExecutionOutcome) {}
}
