//! In-memory host for engine tests
//!
//! [`MemoryHost`] implements every collaborator trait over plain maps, with
//! knobs for the failures tests need to provoke.

use crate::context::{
    AccountInfo, AccountManager, AccountSpec, ApplyContext, Checkout, CheckoutSpec, CommandOutput,
    CommandRunner, CommandSpec, EntryType, ExportSpec, FileSystem, GroupInfo, GroupSpec, Metadata,
    Ownership, PackageManager, RenderedUnit, ServiceState, ServiceSupervisor, SourceControl,
    UnitRenderer,
};
use crate::environment::EnvironmentMapping;
use crate::properties::{AccountId, UnitFormat};
use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Entry {
    meta: Metadata,
    content: Vec<u8>,
}

#[derive(Default)]
struct State {
    packages: BTreeMap<String, String>,
    groups: BTreeMap<String, GroupInfo>,
    accounts: BTreeMap<String, AccountInfo>,
    entries: BTreeMap<PathBuf, Entry>,
    unavailable: HashSet<PathBuf>,
    undeletable: HashSet<PathBuf>,
    services: HashMap<String, ServiceState>,
    service_calls: Vec<String>,
    service_codes: HashMap<String, i32>,
    exit_codes: HashMap<String, i32>,
    creates: HashMap<String, PathBuf>,
    commands_run: Vec<CommandSpec>,
    checkouts: HashMap<PathBuf, Checkout>,
    remotes: HashMap<(String, String), String>,
    rendered: Vec<ExportSpec>,
}

#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn context<'a>(&'a self, env: &'a EnvironmentMapping) -> ApplyContext<'a> {
        ApplyContext {
            packages: self,
            accounts: self,
            fs: self,
            services: self,
            commands: self,
            sources: self,
            renderer: self,
            environment: env,
        }
    }

    // -- setup ---------------------------------------------------------------

    pub fn add_package(&self, name: &str, version: &str) {
        self.lock().packages.insert(name.into(), version.into());
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.lock().groups.insert(
            name.into(),
            GroupInfo {
                name: name.into(),
                gid,
            },
        );
    }

    pub fn add_account(&self, info: AccountInfo) {
        self.lock().accounts.insert(info.name.clone(), info);
    }

    pub fn add_dir(&self, path: &str, owner: &str, group: &str, mode: u32) {
        self.lock().entries.insert(
            path.into(),
            Entry {
                meta: Metadata {
                    entry_type: EntryType::Directory,
                    owner: Some(owner.into()),
                    group: Some(group.into()),
                    uid: 0,
                    gid: 0,
                    mode,
                },
                content: Vec::new(),
            },
        );
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.lock().entries.insert(path.into(), file_entry(content));
    }

    /// Make `stat` on the path fail
    pub fn make_unavailable(&self, path: &str) {
        self.lock().unavailable.insert(path.into());
    }

    /// Make `remove` on the path fail
    pub fn deny_remove(&self, path: &str) {
        self.lock().undeletable.insert(path.into());
    }

    pub fn set_service(&self, name: &str, state: ServiceState) {
        self.lock().services.insert(name.into(), state);
    }

    /// Exit code for `<verb> <service>`, e.g. `"stop memcached"` (default 0)
    pub fn script_service(&self, call: &str, code: i32) {
        self.lock().service_codes.insert(call.into(), code);
    }

    /// Exit code for a command line (default 0)
    pub fn script_command(&self, command: &str, code: i32) {
        self.lock().exit_codes.insert(command.into(), code);
    }

    /// Running the command creates an empty file at `path`
    pub fn create_on_run(&self, command: &str, path: &str) {
        self.lock().creates.insert(command.into(), path.into());
    }

    pub fn set_remote(&self, repository: &str, reference: &str, revision: &str) {
        self.lock()
            .remotes
            .insert((repository.into(), reference.into()), revision.into());
    }

    pub fn set_checkout(&self, path: &str, checkout: Checkout) {
        self.lock().checkouts.insert(path.into(), checkout);
    }

    // -- inspection ----------------------------------------------------------

    pub fn metadata(&self, path: &str) -> Option<Metadata> {
        self.lock().entries.get(Path::new(path)).map(|e| e.meta.clone())
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .entries
            .get(Path::new(path))
            .map(|e| e.content.clone())
    }

    pub fn installed(&self, name: &str) -> Option<String> {
        self.lock().packages.get(name).cloned()
    }

    pub fn group_info(&self, name: &str) -> Option<GroupInfo> {
        self.lock().groups.get(name).cloned()
    }

    pub fn account_info(&self, name: &str) -> Option<AccountInfo> {
        self.lock().accounts.get(name).cloned()
    }

    pub fn commands_run(&self) -> Vec<CommandSpec> {
        self.lock().commands_run.clone()
    }

    pub fn service_calls(&self) -> Vec<String> {
        self.lock().service_calls.clone()
    }

    pub fn rendered_specs(&self) -> Vec<ExportSpec> {
        self.lock().rendered.clone()
    }
}

fn file_entry(content: &[u8]) -> Entry {
    Entry {
        meta: Metadata {
            entry_type: EntryType::File,
            owner: Some("root".into()),
            group: Some("root".into()),
            uid: 0,
            gid: 0,
            mode: 0o644,
        },
        content: content.to_vec(),
    }
}

fn apply_ownership(meta: &mut Metadata, ownership: &Ownership) {
    if let Some(owner) = &ownership.owner {
        meta.uid = owner.parse().unwrap_or(meta.uid);
        meta.owner = Some(owner.clone());
    }
    if let Some(group) = &ownership.group {
        meta.gid = group.parse().unwrap_or(meta.gid);
        meta.group = Some(group.clone());
    }
    if let Some(mode) = ownership.mode {
        meta.mode = mode.bits();
    }
}

impl PackageManager for MemoryHost {
    fn is_installed(&self, name: &str, version: Option<&str>) -> Result<bool> {
        Ok(self
            .lock()
            .packages
            .get(name)
            .is_some_and(|v| version.is_none_or(|wanted| wanted == v.as_str())))
    }

    fn install(&self, name: &str, version: Option<&str>) -> Result<CommandOutput> {
        let version = version.unwrap_or("1.0");
        self.lock().packages.insert(name.into(), version.into());
        Ok(CommandOutput::exited(0))
    }

    fn remove(&self, name: &str) -> Result<CommandOutput> {
        self.lock().packages.remove(name);
        Ok(CommandOutput::exited(0))
    }
}

impl AccountManager for MemoryHost {
    fn group(&self, name: &str) -> Result<Option<GroupInfo>> {
        Ok(self.lock().groups.get(name).cloned())
    }

    fn account(&self, name: &str) -> Result<Option<AccountInfo>> {
        Ok(self.lock().accounts.get(name).cloned())
    }

    fn create_or_update_group(&self, spec: &GroupSpec) -> Result<CommandOutput> {
        let mut state = self.lock();
        let next = 1000 + u32::try_from(state.groups.len())?;
        let gid = spec.gid.unwrap_or(next);
        state.groups.insert(
            spec.name.clone(),
            GroupInfo {
                name: spec.name.clone(),
                gid,
            },
        );
        Ok(CommandOutput::exited(0))
    }

    fn create_or_update_account(&self, spec: &AccountSpec) -> Result<CommandOutput> {
        let mut state = self.lock();

        let (gid, group) = match &spec.gid {
            Some(AccountId::Name(name)) => match state.groups.get(name) {
                Some(g) => (g.gid, Some(g.name.clone())),
                // useradd: group does not exist
                None => return Ok(CommandOutput::exited(6)),
            },
            Some(AccountId::Id(gid)) => (
                *gid,
                state
                    .groups
                    .values()
                    .find(|g| g.gid == *gid)
                    .map(|g| g.name.clone()),
            ),
            None => (100, Some("users".to_string())),
        };

        let next = 1000 + u32::try_from(state.accounts.len())?;
        let existing = state.accounts.get(&spec.name).cloned();
        let info = AccountInfo {
            name: spec.name.clone(),
            uid: spec
                .uid
                .or(existing.as_ref().map(|a| a.uid))
                .unwrap_or(next),
            gid,
            group,
            home: spec
                .home
                .clone()
                .unwrap_or_else(|| PathBuf::from("/home").join(&spec.name)),
            shell: spec
                .shell
                .clone()
                .unwrap_or_else(|| PathBuf::from("/bin/sh")),
            comment: spec.comment.clone().unwrap_or_default(),
        };
        state.accounts.insert(spec.name.clone(), info);
        Ok(CommandOutput::exited(0))
    }
}

impl FileSystem for MemoryHost {
    fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        let state = self.lock();
        if state.unavailable.contains(path) {
            bail!("permission denied: {}", path.display());
        }
        Ok(state.entries.get(path).map(|e| e.meta.clone()))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.lock()
            .entries
            .get(path)
            .filter(|e| e.meta.entry_type == EntryType::File)
            .map(|e| e.content.clone())
            .ok_or_else(|| anyhow!("no such file: {}", path.display()))
    }

    fn write(&self, path: &Path, content: &[u8], ownership: &Ownership) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| file_entry(b""));
        if entry.meta.entry_type != EntryType::File {
            bail!("{} is not a file", path.display());
        }
        entry.content = content.to_vec();
        apply_ownership(&mut entry.meta, ownership);
        Ok(())
    }

    fn create_dir(&self, path: &Path, recursive: bool, ownership: &Ownership) -> Result<()> {
        let mut state = self.lock();
        if recursive {
            for parent in path.ancestors().skip(1) {
                if parent.as_os_str().is_empty() || parent == Path::new("/") {
                    continue;
                }
                state
                    .entries
                    .entry(parent.to_path_buf())
                    .or_insert_with(|| Entry {
                        meta: Metadata {
                            entry_type: EntryType::Directory,
                            owner: Some("root".into()),
                            group: Some("root".into()),
                            uid: 0,
                            gid: 0,
                            mode: 0o755,
                        },
                        content: Vec::new(),
                    });
            }
        }

        let entry = state.entries.entry(path.to_path_buf()).or_insert_with(|| Entry {
            meta: Metadata {
                entry_type: EntryType::Directory,
                owner: Some("root".into()),
                group: Some("root".into()),
                uid: 0,
                gid: 0,
                mode: 0o755,
            },
            content: Vec::new(),
        });
        if entry.meta.entry_type != EntryType::Directory {
            bail!("{} exists and is not a directory", path.display());
        }
        apply_ownership(&mut entry.meta, ownership);
        Ok(())
    }

    fn set_ownership(&self, path: &Path, ownership: &Ownership) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(path)
            .ok_or_else(|| anyhow!("no such path: {}", path.display()))?;
        apply_ownership(&mut entry.meta, ownership);
        Ok(())
    }

    fn remove(&self, path: &Path, recursive: bool) -> Result<()> {
        let mut state = self.lock();
        if state.undeletable.contains(path) {
            bail!("operation not permitted");
        }
        let has_children = state
            .entries
            .keys()
            .any(|p| p != path && p.starts_with(path));
        if has_children && !recursive {
            bail!("directory not empty: {}", path.display());
        }
        state.entries.retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

impl ServiceSupervisor for MemoryHost {
    fn state(&self, name: &str) -> Result<ServiceState> {
        Ok(self
            .lock()
            .services
            .get(name)
            .copied()
            .unwrap_or(ServiceState::Stopped))
    }

    fn start(&self, name: &str) -> Result<CommandOutput> {
        Ok(self.service_call("start", name, ServiceState::Running))
    }

    fn stop(&self, name: &str) -> Result<CommandOutput> {
        Ok(self.service_call("stop", name, ServiceState::Stopped))
    }

    fn restart(&self, name: &str) -> Result<CommandOutput> {
        Ok(self.service_call("restart", name, ServiceState::Running))
    }
}

impl MemoryHost {
    fn service_call(&self, verb: &str, name: &str, after: ServiceState) -> CommandOutput {
        let mut state = self.lock();
        let call = format!("{verb} {name}");
        let code = state.service_codes.get(&call).copied().unwrap_or(0);
        state.service_calls.push(call);
        state.services.insert(name.into(), after);
        CommandOutput::exited(code)
    }
}

impl CommandRunner for MemoryHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.commands_run.push(spec.clone());
        let code = state.exit_codes.get(&spec.command).copied().unwrap_or(0);
        if code == 0
            && let Some(path) = state.creates.get(&spec.command).cloned()
        {
            state.entries.insert(path, file_entry(b""));
        }
        Ok(CommandOutput::exited(code))
    }
}

impl SourceControl for MemoryHost {
    fn checkout(&self, path: &Path) -> Result<Option<Checkout>> {
        Ok(self.lock().checkouts.get(path).cloned())
    }

    fn resolve(&self, repository: &str, reference: &str) -> Result<String> {
        self.lock()
            .remotes
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("cannot resolve {reference} in {repository}"))
    }

    fn sync(&self, spec: &CheckoutSpec) -> Result<()> {
        let revision = self.resolve(&spec.repository, &spec.reference)?;
        self.lock().checkouts.insert(
            spec.path.clone(),
            Checkout {
                repository: spec.repository.clone(),
                revision,
            },
        );
        Ok(())
    }
}

impl UnitRenderer for MemoryHost {
    fn render(&self, spec: &ExportSpec, env: &EnvironmentMapping) -> Result<Vec<RenderedUnit>> {
        self.lock().rendered.push(spec.clone());

        let file_name = match spec.format {
            UnitFormat::Upstart => format!("{}.conf", spec.app),
            UnitFormat::Systemd => format!("{}.target", spec.app),
        };
        let mut content = format!("app={}\n", spec.app);
        for (key, value) in env.iter() {
            content.push_str(&format!("{key}={value}\n"));
        }

        Ok(vec![RenderedUnit {
            path: spec.target_dir.join(file_name),
            content,
        }])
    }
}
