//! Guard evaluation
//!
//! Answers "is this resource already in its declared state?" without
//! changing anything. An explicit guard on the resource replaces the
//! kind's default check entirely.

use crate::action::{export_spec, render_units};
use crate::context::{ApplyContext, CommandSpec, EntryType, Ownership, ServiceState};
use crate::error::GuardError;
use crate::properties::{
    AccountId, DirectoryAction, DirectoryAttrs, ExecuteAttrs, ExportAttrs, FileAction, FileAttrs,
    GitAttrs, GroupAttrs, PackageAction, PackageAttrs, Properties, ServiceAction, ServiceAttrs,
    UserAttrs,
};
use crate::resource::{Condition, Guard, Resource};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Read-only idempotency checks against the host
pub struct GuardEvaluator<'a> {
    ctx: &'a ApplyContext<'a>,
}

impl<'a> GuardEvaluator<'a> {
    pub fn new(ctx: &'a ApplyContext<'a>) -> Self {
        Self { ctx }
    }

    /// Whether the resource needs no action
    pub fn is_satisfied(&self, resource: &Resource) -> Result<bool, GuardError> {
        let satisfied = match resource.guard() {
            Some(guard) => self.explicit(guard),
            None => self.default_check(resource),
        };

        satisfied.map_err(|source| GuardError {
            resource: resource.reference().clone(),
            source,
        })
    }

    fn explicit(&self, guard: &Guard) -> Result<bool> {
        Ok(match guard {
            Guard::NotIf(condition) => self.holds(condition)?,
            Guard::OnlyIf(condition) => !self.holds(condition)?,
        })
    }

    fn holds(&self, condition: &Condition) -> Result<bool> {
        match condition {
            Condition::Command(command) => {
                let output = self.ctx.commands.run(&CommandSpec::shell(command.clone()))?;
                log::debug!("guard `{command}` exited with {:?}", output.code);
                Ok(output.success())
            }
            Condition::PathExists(path) => self.ctx.fs.exists(path),
        }
    }

    fn default_check(&self, resource: &Resource) -> Result<bool> {
        let id = resource.identifier();
        match resource.properties() {
            Properties::Package(attrs) => self.package(id, attrs),
            Properties::Group(attrs) => self.group(id, attrs),
            Properties::User(attrs) => self.user(id, attrs),
            Properties::Directory(attrs) => self.directory(id, attrs),
            Properties::File(attrs) => self.file(id, attrs),
            Properties::Execute(attrs) => self.execute(attrs),
            Properties::Service(attrs) => self.service(id, attrs),
            Properties::Log(_) => Ok(false),
            Properties::Git(attrs) => self.git(id, attrs),
            Properties::Export(attrs) => self.export(id, attrs),
        }
    }

    fn package(&self, id: &str, attrs: &PackageAttrs) -> Result<bool> {
        let name = attrs.name(id);
        Ok(match attrs.action {
            PackageAction::Install => self
                .ctx
                .packages
                .is_installed(name, attrs.version.as_deref())?,
            PackageAction::Remove => !self.ctx.packages.is_installed(name, None)?,
        })
    }

    fn group(&self, id: &str, attrs: &GroupAttrs) -> Result<bool> {
        Ok(self
            .ctx
            .accounts
            .group(id)?
            .is_some_and(|info| attrs.gid.is_none_or(|gid| gid == info.gid)))
    }

    fn user(&self, id: &str, attrs: &UserAttrs) -> Result<bool> {
        let Some(info) = self.ctx.accounts.account(id)? else {
            return Ok(false);
        };

        let gid_ok = match &attrs.gid {
            None => true,
            Some(AccountId::Id(gid)) => *gid == info.gid,
            Some(AccountId::Name(name)) => info.group.as_ref() == Some(name),
        };

        Ok(gid_ok
            && attrs.uid.is_none_or(|uid| uid == info.uid)
            && attrs.home.as_ref().is_none_or(|h| *h == info.home)
            && attrs.shell.as_ref().is_none_or(|s| *s == info.shell)
            && attrs.comment.as_ref().is_none_or(|c| *c == info.comment))
    }

    fn directory(&self, id: &str, attrs: &DirectoryAttrs) -> Result<bool> {
        let meta = self.ctx.fs.stat(Path::new(id))?;
        Ok(match attrs.action {
            DirectoryAction::Delete => meta.is_none(),
            DirectoryAction::Create => meta.is_some_and(|m| {
                m.entry_type == EntryType::Directory && directory_ownership(attrs).is_satisfied_by(&m)
            }),
        })
    }

    fn file(&self, id: &str, attrs: &FileAttrs) -> Result<bool> {
        let path = Path::new(id);
        let meta = self.ctx.fs.stat(path)?;
        match attrs.action {
            FileAction::Delete => Ok(meta.is_none()),
            FileAction::Create => {
                let Some(meta) = meta else {
                    return Ok(false);
                };
                if meta.entry_type != EntryType::File || !file_ownership(attrs).is_satisfied_by(&meta)
                {
                    return Ok(false);
                }
                match &attrs.content {
                    Some(content) => Ok(self.ctx.fs.read(path)? == content.as_bytes()),
                    None => Ok(true),
                }
            }
        }
    }

    fn execute(&self, attrs: &ExecuteAttrs) -> Result<bool> {
        match sentinel_path(attrs) {
            Some(path) => self.ctx.fs.exists(&path),
            None => Ok(false),
        }
    }

    fn service(&self, id: &str, attrs: &ServiceAttrs) -> Result<bool> {
        let name = attrs.name(id);
        Ok(match attrs.action {
            ServiceAction::Restart => false,
            ServiceAction::Start => self.ctx.services.state(name)? == ServiceState::Running,
            ServiceAction::Stop => self.ctx.services.state(name)? == ServiceState::Stopped,
        })
    }

    fn git(&self, id: &str, attrs: &GitAttrs) -> Result<bool> {
        let Some(checkout) = self.ctx.sources.checkout(Path::new(id))? else {
            return Ok(false);
        };
        if checkout.repository != attrs.repository {
            return Ok(false);
        }
        let wanted = self.ctx.sources.resolve(&attrs.repository, &attrs.reference)?;
        Ok(checkout.revision == wanted)
    }

    fn export(&self, id: &str, attrs: &ExportAttrs) -> Result<bool> {
        let units = render_units(self.ctx, &export_spec(id, attrs), attrs)?;
        for unit in &units {
            if !self.ctx.fs.exists(&unit.path)? {
                return Ok(false);
            }
            if self.ctx.fs.read(&unit.path)? != unit.content.as_bytes() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub(crate) fn directory_ownership(attrs: &DirectoryAttrs) -> Ownership {
    Ownership {
        owner: attrs.owner.clone(),
        group: attrs.group.clone(),
        mode: attrs.mode,
    }
}

pub(crate) fn file_ownership(attrs: &FileAttrs) -> Ownership {
    Ownership {
        owner: attrs.owner.clone(),
        group: attrs.group.clone(),
        mode: attrs.mode,
    }
}

/// `creates` resolved against the working directory
fn sentinel_path(attrs: &ExecuteAttrs) -> Option<PathBuf> {
    let creates = attrs.creates.as_ref()?;
    Some(match &attrs.cwd {
        Some(cwd) if creates.is_relative() => cwd.join(creates),
        _ => creates.clone(),
    })
}
