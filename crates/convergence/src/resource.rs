//! The resource model
//!
//! A [`Resource`] is one declared unit of host state: a package, account,
//! path, command, service, log line, checkout or set of exported units.
//! It is identified by its [`ResourceRef`] (`kind[identifier]`) and carries
//! typed, immutable [`Properties`] plus the engine-level options shared by
//! every kind (guard, accepted exit codes, failure policy, references).

use crate::properties::{
    DirectoryAction, DirectoryAttrs, FileAction, FileAttrs, PackageAction, Properties,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Category of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Package,
    Group,
    User,
    Directory,
    File,
    Execute,
    Service,
    Log,
    Git,
    Export,
}

impl ResourceKind {
    /// All kinds, in display order
    pub const ALL: [Self; 10] = [
        Self::Package,
        Self::Group,
        Self::User,
        Self::Directory,
        Self::File,
        Self::Execute,
        Self::Service,
        Self::Log,
        Self::Git,
        Self::Export,
    ];

    /// Name used in references and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Group => "group",
            Self::User => "user",
            Self::Directory => "directory",
            Self::File => "file",
            Self::Execute => "execute",
            Self::Service => "service",
            Self::Log => "log",
            Self::Git => "git",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// Identity of a resource within a run: `kind[identifier]`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub identifier: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.identifier)
    }
}

/// A reference to another resource, as written in a declaration
///
/// `service[nginx]` names a kind explicitly; `nginx` alone matches any
/// resource with that identifier and must be unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Qualified(ResourceRef),
    Bare(String),
}

impl Reference {
    /// Parse `kind[identifier]` or a bare identifier
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty resource reference".to_string());
        }

        if let Some(open) = text.find('[')
            && text.ends_with(']')
        {
            let kind: ResourceKind = text[..open].parse()?;
            let identifier = &text[open + 1..text.len() - 1];
            if identifier.is_empty() {
                return Err(format!("empty identifier in reference '{text}'"));
            }
            return Ok(Self::Qualified(ResourceRef::new(kind, identifier)));
        }

        Ok(Self::Bare(text.to_string()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qualified(r) => r.fmt(f),
            Self::Bare(id) => f.write_str(id),
        }
    }
}

/// A condition checked by an explicit guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Holds iff the shell command exits 0
    Command(String),
    /// Holds iff the path exists
    PathExists(PathBuf),
}

/// Explicit idempotency predicate overriding a kind's default check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Satisfied (action skipped) when the condition holds
    NotIf(Condition),
    /// Satisfied (action skipped) when the condition does not hold
    OnlyIf(Condition),
}

/// A declared unit of desired host state
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    reference: ResourceRef,
    properties: Properties,
    guard: Option<Guard>,
    accepted_exit_codes: Option<BTreeSet<i32>>,
    ignore_failure: bool,
    depends_on: Vec<Reference>,
    notifies: Vec<Reference>,
    recipe: Option<String>,
}

impl Resource {
    /// Create a resource with default options
    pub fn new(identifier: impl Into<String>, properties: Properties) -> Self {
        Self {
            reference: ResourceRef::new(properties.kind(), identifier),
            properties,
            guard: None,
            accepted_exit_codes: None,
            ignore_failure: false,
            depends_on: Vec::new(),
            notifies: Vec::new(),
            recipe: None,
        }
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Declare the exit codes treated as success
    pub fn accepting(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.accepted_exit_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    pub fn depending_on(mut self, reference: Reference) -> Self {
        self.depends_on.push(reference);
        self
    }

    pub fn notifying(mut self, reference: Reference) -> Self {
        self.notifies.push(reference);
        self
    }

    pub fn from_recipe(mut self, recipe: impl Into<String>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    pub fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    pub fn kind(&self) -> ResourceKind {
        self.reference.kind
    }

    pub fn identifier(&self) -> &str {
        &self.reference.identifier
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// Exit codes declared as success, if any were declared
    pub fn declared_exit_codes(&self) -> Option<&BTreeSet<i32>> {
        self.accepted_exit_codes.as_ref()
    }

    /// Whether `code` counts as success (`{0}` unless declared otherwise)
    pub fn accepts_exit_code(&self, code: i32) -> bool {
        self.accepted_exit_codes
            .as_ref()
            .map_or(code == 0, |codes| codes.contains(&code))
    }

    pub fn ignores_failure(&self) -> bool {
        self.ignore_failure
    }

    /// Whether a failure of this resource lets the run continue
    pub fn failure_is_acceptable(&self) -> bool {
        self.ignore_failure || self.accepted_exit_codes.is_some()
    }

    pub fn depends_on(&self) -> &[Reference] {
        &self.depends_on
    }

    pub fn notifies(&self) -> &[Reference] {
        &self.notifies
    }

    pub fn recipe(&self) -> Option<&str> {
        self.recipe.as_deref()
    }

    /// Whether the action removes state; such resources never act on
    /// state that could not be inspected.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self.properties,
            Properties::Directory(DirectoryAttrs {
                action: DirectoryAction::Delete,
                ..
            }) | Properties::File(FileAttrs {
                action: FileAction::Delete,
                ..
            })
        ) || matches!(&self.properties, Properties::Package(p) if p.action == PackageAction::Remove)
    }

    /// Human-readable description of the declared state
    pub fn description(&self) -> String {
        self.properties.describe(self.identifier())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reference.fmt(f)
    }
}
