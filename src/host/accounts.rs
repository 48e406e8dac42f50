//! Local accounts from /etc/passwd and /etc/group, managed with shadow-utils

use crate::runner;
use anyhow::{Context, Result};
use convergence::{AccountInfo, AccountManager, AccountSpec, CommandOutput, GroupInfo, GroupSpec};
use convergence::properties::AccountId;
use std::fs;
use std::path::PathBuf;

/// One line of /etc/passwd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub comment: String,
    pub home: PathBuf,
    pub shell: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SystemAccounts {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for SystemAccounts {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

impl SystemAccounts {
    /// Read account databases from other files
    #[cfg(test)]
    pub fn with_files(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    pub fn users(&self) -> Result<Vec<PasswdEntry>> {
        let text = fs::read_to_string(&self.passwd)
            .with_context(|| format!("Could not read {}", self.passwd.display()))?;
        Ok(parse_passwd(&text))
    }

    pub fn groups(&self) -> Result<Vec<GroupInfo>> {
        let text = fs::read_to_string(&self.group)
            .with_context(|| format!("Could not read {}", self.group.display()))?;
        Ok(parse_group(&text))
    }

    pub fn user_name(&self, uid: u32) -> Result<Option<String>> {
        Ok(self
            .users()?
            .into_iter()
            .find(|u| u.uid == uid)
            .map(|u| u.name))
    }

    pub fn group_name(&self, gid: u32) -> Result<Option<String>> {
        Ok(self
            .groups()?
            .into_iter()
            .find(|g| g.gid == gid)
            .map(|g| g.name))
    }

    /// Numeric uid for a name (or a numeric string)
    pub fn uid_of(&self, name: &str) -> Result<u32> {
        if let Ok(uid) = name.parse() {
            return Ok(uid);
        }
        self.users()?
            .into_iter()
            .find(|u| u.name == name)
            .map(|u| u.uid)
            .with_context(|| format!("no such user: {name}"))
    }

    /// Numeric gid for a name (or a numeric string)
    pub fn gid_of(&self, name: &str) -> Result<u32> {
        if let Ok(gid) = name.parse() {
            return Ok(gid);
        }
        self.groups()?
            .into_iter()
            .find(|g| g.name == name)
            .map(|g| g.gid)
            .with_context(|| format!("no such group: {name}"))
    }
}

impl AccountManager for SystemAccounts {
    fn group(&self, name: &str) -> Result<Option<GroupInfo>> {
        Ok(self.groups()?.into_iter().find(|g| g.name == name))
    }

    fn account(&self, name: &str) -> Result<Option<AccountInfo>> {
        let Some(user) = self.users()?.into_iter().find(|u| u.name == name) else {
            return Ok(None);
        };
        let group = self.group_name(user.gid)?;
        Ok(Some(AccountInfo {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
            group,
            home: user.home,
            shell: user.shell,
            comment: user.comment,
        }))
    }

    fn create_or_update_group(&self, spec: &GroupSpec) -> Result<CommandOutput> {
        match (self.group(&spec.name)?, spec.gid) {
            (Some(existing), Some(gid)) if existing.gid != gid => {
                runner::run("groupmod", &["-g", &gid.to_string(), &spec.name])
            }
            (Some(_), _) => Ok(CommandOutput::exited(0)),
            (None, gid) => {
                let gid = gid.map(|g| g.to_string());
                let mut args = Vec::new();
                if let Some(gid) = &gid {
                    args.extend(["-g", gid.as_str()]);
                }
                args.push(spec.name.as_str());
                runner::run("groupadd", &args)
            }
        }
    }

    fn create_or_update_account(&self, spec: &AccountSpec) -> Result<CommandOutput> {
        match self.account(&spec.name)? {
            Some(existing) => {
                let args = usermod_args(spec, &existing);
                if args.is_empty() {
                    return Ok(CommandOutput::exited(0));
                }
                let mut args: Vec<&str> = args.iter().map(String::as_str).collect();
                args.push(&spec.name);
                runner::run("usermod", &args)
            }
            None => {
                let args = useradd_args(spec);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                runner::run("useradd", &args)
            }
        }
    }
}

fn parse_passwd(text: &str) -> Vec<PasswdEntry> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                comment: fields[4].to_string(),
                home: PathBuf::from(fields[5]),
                shell: PathBuf::from(fields[6]),
            })
        })
        .collect()
}

fn parse_group(text: &str) -> Vec<GroupInfo> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let gid = fields.nth(1)?.parse().ok()?;
            Some(GroupInfo {
                name: name.to_string(),
                gid,
            })
        })
        .collect()
}

fn gid_arg(gid: &AccountId) -> String {
    gid.to_string()
}

/// `useradd` arguments for a new account (name last)
fn useradd_args(spec: &AccountSpec) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(uid) = spec.uid {
        args.extend(["-u".to_string(), uid.to_string()]);
    }
    if let Some(gid) = &spec.gid {
        args.extend(["-g".to_string(), gid_arg(gid)]);
    }
    if let Some(home) = &spec.home {
        args.extend(["-d".to_string(), home.display().to_string()]);
    }
    if let Some(shell) = &spec.shell {
        args.extend(["-s".to_string(), shell.display().to_string()]);
    }
    if let Some(comment) = &spec.comment {
        args.extend(["-c".to_string(), comment.clone()]);
    }
    if spec.manage_home {
        args.push("-m".to_string());
    }
    args.push(spec.name.clone());
    args
}

/// `usermod` arguments for the fields that differ (name not included)
fn usermod_args(spec: &AccountSpec, existing: &AccountInfo) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(uid) = spec.uid.filter(|uid| *uid != existing.uid) {
        args.extend(["-u".to_string(), uid.to_string()]);
    }
    let gid_differs = match &spec.gid {
        Some(AccountId::Id(gid)) => *gid != existing.gid,
        Some(AccountId::Name(name)) => existing.group.as_ref() != Some(name),
        None => false,
    };
    if let Some(gid) = spec.gid.as_ref().filter(|_| gid_differs) {
        args.extend(["-g".to_string(), gid_arg(gid)]);
    }
    if let Some(home) = spec.home.as_ref().filter(|h| **h != existing.home) {
        args.extend(["-d".to_string(), home.display().to_string()]);
        if spec.manage_home {
            args.push("-m".to_string());
        }
    }
    if let Some(shell) = spec.shell.as_ref().filter(|s| **s != existing.shell) {
        args.extend(["-s".to_string(), shell.display().to_string()]);
    }
    if let Some(comment) = spec.comment.as_ref().filter(|c| **c != existing.comment) {
        args.extend(["-c".to_string(), comment.clone()]);
    }
    args
}
