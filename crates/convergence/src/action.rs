//! Action execution
//!
//! [`ActionExecutor::apply`] brings one resource to its declared state
//! through the collaborators. It never checks whether that is needed;
//! the converger asks the guard evaluator first.

use crate::context::{
    AccountSpec, ApplyContext, CheckoutSpec, CommandOutput, CommandSpec, ExportSpec, GroupSpec,
    Ownership, RenderedUnit,
};
use crate::environment::EnvironmentMapping;
use crate::error::ActionError;
use crate::guard::{directory_ownership, file_ownership};
use crate::properties::{
    DirectoryAction, DirectoryAttrs, ExecuteAttrs, ExportAttrs, FileAction, FileAttrs, GitAttrs,
    GroupAttrs, LogAttrs, Mode, PackageAction, PackageAttrs, Properties, ServiceAction,
    ServiceAttrs, UserAttrs,
};
use crate::resource::Resource;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Permission bits of exported unit files
const UNIT_MODE: u32 = 0o644;

/// What an action did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Whether host state was modified
    pub changed: bool,
    pub detail: Option<String>,
}

impl ActionResult {
    fn changed() -> Self {
        Self {
            success: true,
            changed: true,
            ..Default::default()
        }
    }

    fn unchanged(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Judge a collaborator command against the accepted exit codes
    fn from_output(output: &CommandOutput, accepts: impl Fn(i32) -> bool) -> Self {
        let success = output.code.is_some_and(accepts);
        Self {
            success,
            exit_code: output.code,
            changed: success,
            detail: (!success).then(|| failure_detail(output)),
        }
    }
}

/// Unconditionally applies resources
pub struct ActionExecutor<'a> {
    ctx: &'a ApplyContext<'a>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(ctx: &'a ApplyContext<'a>) -> Self {
        Self { ctx }
    }

    /// Apply the resource's declared action
    pub fn apply(&self, resource: &Resource) -> Result<ActionResult, ActionError> {
        let id = resource.identifier();
        let result = match resource.properties() {
            Properties::Package(attrs) => self.package(id, attrs),
            Properties::Group(attrs) => self.group(id, attrs),
            Properties::User(attrs) => self.user(id, attrs),
            Properties::Directory(attrs) => self.directory(id, attrs),
            Properties::File(attrs) => self.file(id, attrs),
            Properties::Execute(attrs) => self.execute(resource, attrs),
            Properties::Service(attrs) => self.service(resource, attrs, attrs.action),
            Properties::Log(attrs) => Ok(emit(attrs)),
            Properties::Git(attrs) => self.git(id, attrs),
            Properties::Export(attrs) => {
                if let Some(var) = missing_env_var(attrs, self.ctx.environment) {
                    return Err(ActionError::MissingInput {
                        resource: resource.reference().clone(),
                        what: format!("environment variable {var}"),
                    });
                }
                self.export(id, attrs)
            }
        };

        result.map_err(|source| ActionError::Collaborator {
            resource: resource.reference().clone(),
            source,
        })
    }

    /// Respond to a notification
    ///
    /// Services are restarted; every other kind re-applies its action.
    pub fn notify(&self, resource: &Resource) -> Result<ActionResult, ActionError> {
        match resource.properties() {
            Properties::Service(attrs) => self
                .service(resource, attrs, ServiceAction::Restart)
                .map_err(|source| ActionError::Collaborator {
                    resource: resource.reference().clone(),
                    source,
                }),
            _ => self.apply(resource),
        }
    }

    fn package(&self, id: &str, attrs: &PackageAttrs) -> Result<ActionResult> {
        let name = attrs.name(id);
        let output = match attrs.action {
            PackageAction::Install => {
                log::info!("Installing package {name}");
                self.ctx.packages.install(name, attrs.version.as_deref())?
            }
            PackageAction::Remove => {
                log::info!("Removing package {name}");
                self.ctx.packages.remove(name)?
            }
        };
        Ok(ActionResult::from_output(&output, |code| code == 0))
    }

    fn group(&self, id: &str, attrs: &GroupAttrs) -> Result<ActionResult> {
        let output = self.ctx.accounts.create_or_update_group(&GroupSpec {
            name: id.to_string(),
            gid: attrs.gid,
        })?;
        Ok(ActionResult::from_output(&output, |code| code == 0))
    }

    fn user(&self, id: &str, attrs: &UserAttrs) -> Result<ActionResult> {
        let output = self.ctx.accounts.create_or_update_account(&AccountSpec {
            name: id.to_string(),
            uid: attrs.uid,
            gid: attrs.gid.clone(),
            home: attrs.home.clone(),
            shell: attrs.shell.clone(),
            comment: attrs.comment.clone(),
            manage_home: attrs.manage_home,
        })?;
        Ok(ActionResult::from_output(&output, |code| code == 0))
    }

    fn directory(&self, id: &str, attrs: &DirectoryAttrs) -> Result<ActionResult> {
        let path = Path::new(id);
        match attrs.action {
            DirectoryAction::Create => {
                self.ctx
                    .fs
                    .create_dir(path, attrs.recursive, &directory_ownership(attrs))
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                Ok(ActionResult::changed())
            }
            DirectoryAction::Delete => {
                if !self.ctx.fs.exists(path)? {
                    return Ok(ActionResult::unchanged("already absent"));
                }
                self.ctx
                    .fs
                    .remove(path, attrs.recursive)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                Ok(ActionResult::changed())
            }
        }
    }

    fn file(&self, id: &str, attrs: &FileAttrs) -> Result<ActionResult> {
        let path = Path::new(id);
        let ownership = file_ownership(attrs);
        match attrs.action {
            FileAction::Create => {
                match &attrs.content {
                    Some(content) => self.ctx.fs.write(path, content.as_bytes(), &ownership),
                    None if self.ctx.fs.exists(path)? => self.ctx.fs.set_ownership(path, &ownership),
                    None => self.ctx.fs.write(path, b"", &ownership),
                }
                .with_context(|| format!("Failed to write {}", path.display()))?;
                Ok(ActionResult::changed())
            }
            FileAction::Delete => {
                if !self.ctx.fs.exists(path)? {
                    return Ok(ActionResult::unchanged("already absent"));
                }
                self.ctx
                    .fs
                    .remove(path, false)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                Ok(ActionResult::changed())
            }
        }
    }

    fn execute(&self, resource: &Resource, attrs: &ExecuteAttrs) -> Result<ActionResult> {
        let spec = CommandSpec {
            command: attrs.command.clone(),
            interpreter: attrs.interpreter,
            cwd: attrs.cwd.clone(),
            user: attrs.user.clone(),
            path: attrs.path.clone(),
            environment: attrs.environment.clone(),
        };
        log::debug!("Running `{}` under {}", spec.command, spec.interpreter.program());

        let output = self.ctx.commands.run(&spec)?;
        Ok(ActionResult::from_output(&output, |code| {
            resource.accepts_exit_code(code)
        }))
    }

    fn service(
        &self,
        resource: &Resource,
        attrs: &ServiceAttrs,
        action: ServiceAction,
    ) -> Result<ActionResult> {
        let name = attrs.name(resource.identifier());
        let output = match action {
            ServiceAction::Start => self.ctx.services.start(name)?,
            ServiceAction::Stop => self.ctx.services.stop(name)?,
            ServiceAction::Restart => self.ctx.services.restart(name)?,
        };
        Ok(ActionResult::from_output(&output, |code| {
            resource.accepts_exit_code(code)
        }))
    }

    fn git(&self, id: &str, attrs: &GitAttrs) -> Result<ActionResult> {
        self.ctx.sources.sync(&CheckoutSpec {
            path: PathBuf::from(id),
            repository: attrs.repository.clone(),
            reference: attrs.reference.clone(),
            user: attrs.user.clone(),
        })?;
        Ok(ActionResult::changed())
    }

    fn export(&self, id: &str, attrs: &ExportAttrs) -> Result<ActionResult> {
        let units = render_units(self.ctx, &export_spec(id, attrs), attrs)?;
        let ownership = Ownership {
            mode: Some(Mode::new(UNIT_MODE).map_err(anyhow::Error::msg)?),
            ..Default::default()
        };

        for unit in &units {
            self.ctx
                .fs
                .write(&unit.path, unit.content.as_bytes(), &ownership)
                .with_context(|| format!("Failed to write unit {}", unit.path.display()))?;
        }

        Ok(ActionResult {
            detail: Some(format!("{} unit(s) written", units.len())),
            ..ActionResult::changed()
        })
    }
}

fn emit(attrs: &LogAttrs) -> ActionResult {
    log::log!(log::Level::from(attrs.level), "{}", attrs.message);
    ActionResult::changed()
}

/// Last meaningful line of a failed command's output
fn failure_detail(output: &CommandOutput) -> String {
    let status = match output.code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    };

    let stderr = output.stderr_str();
    let stdout = output.stdout_str();
    let last_line = [stderr.as_str(), stdout.as_str()]
        .into_iter()
        .find_map(|text| text.lines().rev().map(str::trim).find(|l| !l.is_empty()));

    match last_line {
        Some(line) => format!("{status}: {line}"),
        None => status,
    }
}

// ============================================================================
// Export helpers (shared with the guard)
// ============================================================================

pub(crate) fn export_spec(id: &str, attrs: &ExportAttrs) -> ExportSpec {
    let procfile = attrs
        .procfile
        .clone()
        .unwrap_or_else(|| PathBuf::from("Procfile"));

    ExportSpec {
        app: id.to_string(),
        format: attrs.format,
        target_dir: attrs.target_dir(),
        user: attrs.user.clone(),
        cwd: attrs.cwd.clone(),
        procfile: relative_to(attrs.cwd.as_deref(), procfile),
    }
}

/// First `env_vars` entry absent from the invoking environment
pub(crate) fn missing_env_var<'a>(
    attrs: &'a ExportAttrs,
    env: &EnvironmentMapping,
) -> Option<&'a str> {
    attrs
        .env_vars
        .iter()
        .map(String::as_str)
        .find(|var| env.get(var).is_none())
}

/// Environment for exported units: `env_file`, then `env_vars`, then `env`
pub(crate) fn export_environment(
    ctx: &ApplyContext<'_>,
    attrs: &ExportAttrs,
) -> Result<EnvironmentMapping> {
    let mut mapping = EnvironmentMapping::new();

    if let Some(file) = &attrs.env_file {
        let path = relative_to(attrs.cwd.as_deref(), file.clone());
        let bytes = ctx
            .fs
            .read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let parsed = EnvironmentMapping::parse(&text)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        mapping.extend(&parsed);
    }

    for var in &attrs.env_vars {
        let value = ctx
            .environment
            .get(var)
            .with_context(|| format!("environment variable {var} is not set"))?;
        mapping.insert(var.clone(), value);
    }

    for (key, value) in &attrs.env {
        mapping.insert(key.clone(), value.clone());
    }

    Ok(mapping)
}

pub(crate) fn render_units(
    ctx: &ApplyContext<'_>,
    spec: &ExportSpec,
    attrs: &ExportAttrs,
) -> Result<Vec<RenderedUnit>> {
    let env = export_environment(ctx, attrs)?;
    ctx.renderer
        .render(spec, &env)
        .with_context(|| format!("Failed to render units for {}", spec.app))
}

fn relative_to(base: Option<&Path>, path: PathBuf) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}
