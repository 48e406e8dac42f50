//! Typed, per-kind resource properties
//!
//! Declarations arrive as loose attribute tables. Each kind has a closed
//! struct here; unknown keys are rejected when the table is converted, so
//! a typo in a recipe fails the graph build instead of being ignored at
//! action time.

use crate::resource::ResourceKind;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Unix permission bits, written as an octal string (`"0755"`) or an
/// octal integer literal (`0o755`)
///
/// Integers above `0o777` are rejected: TOML has no way to tell `755` from
/// `0o1363`, and the special bits have to be spelled as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    pub const MAX: u32 = 0o7777;

    pub fn new(bits: u32) -> Result<Self, String> {
        if bits > Self::MAX {
            return Err(format!("mode {bits:o} exceeds {:o}", Self::MAX));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits.strip_prefix("0o").unwrap_or(digits);
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| format!("invalid octal mode '{s}'"))?;
        Self::new(bits)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bits(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bits(bits) if bits > 0o777 => Err(D::Error::custom(format!(
                "integer mode {bits} is ambiguous; quote it as an octal string such as \"0755\""
            ))),
            Raw::Bits(bits) => Self::new(bits).map_err(D::Error::custom),
            Raw::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

/// An account or group given by name or numeric id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Id(u32),
    Name(String),
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

// ============================================================================
// Per-kind attributes
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    #[default]
    Install,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageAttrs {
    pub action: PackageAction,
    /// Exact version to install
    pub version: Option<String>,
    /// Package name when it differs from the identifier
    pub package_name: Option<String>,
}

impl PackageAttrs {
    pub fn name<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.package_name.as_deref().unwrap_or(identifier)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupAttrs {
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserAttrs {
    pub uid: Option<u32>,
    /// Primary group
    pub gid: Option<AccountId>,
    pub home: Option<PathBuf>,
    pub shell: Option<PathBuf>,
    pub comment: Option<String>,
    /// Create the home directory with the account
    pub manage_home: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryAction {
    #[default]
    Create,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryAttrs {
    pub action: DirectoryAction,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,
    /// Create missing parents, or delete the whole subtree
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    #[default]
    Create,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileAttrs {
    pub action: FileAction,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,
    /// Exact content; when absent only existence and ownership are managed
    pub content: Option<String>,
}

/// Shell used to run an Execute resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpreter {
    #[default]
    Sh,
    Bash,
}

impl Interpreter {
    pub fn program(self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Bash => "bash",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecuteAttrs {
    /// Command line; defaults to the identifier
    pub command: String,
    #[serde(skip)]
    pub interpreter: Interpreter,
    pub cwd: Option<PathBuf>,
    /// Effective user
    pub user: Option<String>,
    /// Sentinel path; the command is considered done once it exists
    pub creates: Option<PathBuf>,
    /// Search path replacing PATH for the command
    pub path: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

impl ExecuteAttrs {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

/// Declaration shape of a `bash` resource
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BashDecl {
    code: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    creates: Option<PathBuf>,
    #[serde(default)]
    path: Vec<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

impl From<BashDecl> for ExecuteAttrs {
    fn from(decl: BashDecl) -> Self {
        Self {
            command: decl.code,
            interpreter: Interpreter::Bash,
            cwd: decl.cwd,
            user: decl.user,
            creates: decl.creates,
            path: decl.path,
            environment: decl.environment,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    #[default]
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceAttrs {
    pub action: ServiceAction,
    pub service_name: Option<String>,
}

impl ServiceAttrs {
    pub fn name<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.service_name.as_deref().unwrap_or(identifier)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogAttrs {
    /// Message; defaults to the identifier
    pub message: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitAttrs {
    pub repository: String,
    #[serde(default = "default_reference")]
    pub reference: String,
    #[serde(default)]
    pub user: Option<String>,
}

fn default_reference() -> String {
    "HEAD".to_string()
}

/// Unit format produced by an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitFormat {
    #[default]
    Upstart,
    Systemd,
}

impl UnitFormat {
    pub fn default_target_dir(self) -> PathBuf {
        match self {
            Self::Upstart => PathBuf::from("/etc/init"),
            Self::Systemd => PathBuf::from("/etc/systemd/system"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportAttrs {
    pub format: UnitFormat,
    pub target_dir: Option<PathBuf>,
    /// Account the exported processes run as
    pub user: Option<String>,
    /// Working directory of the processes; the Procfile is resolved against it
    pub cwd: Option<PathBuf>,
    pub procfile: Option<PathBuf>,
    /// `KEY=value` file contributing to the environment mapping
    pub env_file: Option<PathBuf>,
    /// Variables copied from the invoking environment
    pub env_vars: Vec<String>,
    /// Inline variables
    pub env: BTreeMap<String, String>,
}

impl ExportAttrs {
    pub fn target_dir(&self) -> PathBuf {
        self.target_dir
            .clone()
            .unwrap_or_else(|| self.format.default_target_dir())
    }
}

// ============================================================================
// Properties
// ============================================================================

/// Typed properties of a resource, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum Properties {
    Package(PackageAttrs),
    Group(GroupAttrs),
    User(UserAttrs),
    Directory(DirectoryAttrs),
    File(FileAttrs),
    Execute(ExecuteAttrs),
    Service(ServiceAttrs),
    Log(LogAttrs),
    Git(GitAttrs),
    Export(ExportAttrs),
}

/// Why a declaration could not be turned into [`Properties`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertiesError {
    UnknownType,
    Invalid(String),
}

impl Properties {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Package(_) => ResourceKind::Package,
            Self::Group(_) => ResourceKind::Group,
            Self::User(_) => ResourceKind::User,
            Self::Directory(_) => ResourceKind::Directory,
            Self::File(_) => ResourceKind::File,
            Self::Execute(_) => ResourceKind::Execute,
            Self::Service(_) => ResourceKind::Service,
            Self::Log(_) => ResourceKind::Log,
            Self::Git(_) => ResourceKind::Git,
            Self::Export(_) => ResourceKind::Export,
        }
    }

    /// Kind a declaration type string maps to, if it is known
    pub fn kind_of(type_name: &str) -> Option<ResourceKind> {
        match type_name {
            "bash" => Some(ResourceKind::Execute),
            other => other.parse().ok(),
        }
    }

    /// Convert a declaration's attribute table for the given type
    pub fn parse(
        type_name: &str,
        identifier: &str,
        attributes: toml::Table,
    ) -> Result<Self, PropertiesError> {
        let value = toml::Value::Table(attributes);
        let properties = match type_name {
            "package" => Self::Package(convert(value)?),
            "group" => Self::Group(convert(value)?),
            "user" => Self::User(convert(value)?),
            "directory" => Self::Directory(convert(value)?),
            "file" => Self::File(convert(value)?),
            "execute" => {
                let mut attrs: ExecuteAttrs = convert(value)?;
                if attrs.command.trim().is_empty() {
                    attrs.command = identifier.to_string();
                }
                Self::Execute(attrs)
            }
            "bash" => Self::Execute(convert::<BashDecl>(value)?.into()),
            "service" => Self::Service(convert(value)?),
            "log" => {
                let mut attrs: LogAttrs = convert(value)?;
                if attrs.message.is_empty() {
                    attrs.message = identifier.to_string();
                }
                Self::Log(attrs)
            }
            "git" => Self::Git(convert(value)?),
            "export" => Self::Export(convert(value)?),
            _ => return Err(PropertiesError::UnknownType),
        };
        Ok(properties)
    }

    /// One-line description of the declared state
    pub fn describe(&self, identifier: &str) -> String {
        match self {
            Self::Package(p) => match (&p.action, &p.version) {
                (PackageAction::Install, Some(v)) => {
                    format!("Install package {} {v}", p.name(identifier))
                }
                (PackageAction::Install, None) => format!("Install package {}", p.name(identifier)),
                (PackageAction::Remove, _) => format!("Remove package {}", p.name(identifier)),
            },
            Self::Group(_) => format!("Ensure group {identifier}"),
            Self::User(_) => format!("Ensure user {identifier}"),
            Self::Directory(d) => match d.action {
                DirectoryAction::Create => format!("Create directory {identifier}"),
                DirectoryAction::Delete => format!("Delete directory {identifier}"),
            },
            Self::File(f) => match f.action {
                FileAction::Create => format!("Write file {identifier}"),
                FileAction::Delete => format!("Delete file {identifier}"),
            },
            Self::Execute(e) => format!("Run `{}`", e.command),
            Self::Service(s) => {
                let verb = match s.action {
                    ServiceAction::Start => "Start",
                    ServiceAction::Stop => "Stop",
                    ServiceAction::Restart => "Restart",
                };
                format!("{verb} service {}", s.name(identifier))
            }
            Self::Log(_) => format!("Log {identifier}"),
            Self::Git(g) => format!("Check out {}@{} at {identifier}", g.repository, g.reference),
            Self::Export(e) => format!(
                "Export {identifier} units to {}",
                e.target_dir().display()
            ),
        }
    }
}

fn convert<T: for<'de> Deserialize<'de>>(value: toml::Value) -> Result<T, PropertiesError> {
    value
        .try_into()
        .map_err(|e: toml::de::Error| PropertiesError::Invalid(e.message().to_string()))
}
