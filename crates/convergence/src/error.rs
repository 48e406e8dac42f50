//! Error taxonomy for the engine.
//!
//! Errors are split by the phase that raises them because each phase has
//! a different propagation policy:
//!
//! - [`GraphError`] is raised while building the resource graph. It is
//!   always fatal: the run never starts.
//! - [`GuardError`] is raised when the current state of a resource cannot
//!   be determined. The converger absorbs it for non-destructive resources
//!   and aborts on it for destructive ones.
//! - [`ActionError`] is raised when an action could not be carried out at
//!   all (as opposed to running and exiting non-zero). It is recorded in
//!   the run report and handled by the declared failure policy.
//!
//! Commands that hang are not interrupted; there is no timeout error.

use crate::resource::ResourceRef;
use thiserror::Error;

/// Errors raised while expanding declarations into a [`crate::ResourceGraph`].
#[derive(Debug, Error)]
pub enum GraphError {
    /// A declaration table could not be interpreted at all
    #[error("malformed declaration{}: {message}", recipe_suffix(.recipe.as_deref()))]
    Malformed {
        /// Recipe the declaration came from, when known
        recipe: Option<String>,
        /// What is wrong with it
        message: String,
    },

    /// A declaration names a resource type the engine does not know
    #[error("unknown resource type '{kind}' for '{identifier}'")]
    UnknownKind {
        /// The declared type string
        kind: String,
        /// The declared identifier
        identifier: String,
    },

    /// A resource declaration carries invalid attributes
    #[error("invalid resource {resource}: {message}")]
    InvalidResource {
        /// The offending resource
        resource: ResourceRef,
        /// Validation failure, usually from the attribute deserializer
        message: String,
    },

    /// An included recipe could not be found or loaded
    #[error("cannot load recipe '{name}': {message}")]
    Recipe {
        /// Recipe name as written in the include directive
        name: String,
        /// Loader failure
        message: String,
    },

    /// A dependency or notification points at nothing
    #[error("{from} references {reference}, which is not declared in this run")]
    UnknownReference {
        /// Resource that declared the reference
        from: ResourceRef,
        /// The reference as written
        reference: String,
    },

    /// A bare identifier matches resources of more than one kind
    #[error("{from} references '{reference}', which is ambiguous ({})", join_refs(.candidates))]
    AmbiguousReference {
        /// Resource that declared the reference
        from: ResourceRef,
        /// The reference as written
        reference: String,
        /// Every resource the identifier matches
        candidates: Vec<ResourceRef>,
    },

    /// Explicit dependencies form a cycle
    #[error("dependency cycle between {}", join_refs(.members))]
    Cycle {
        /// Resources that could not be ordered
        members: Vec<ResourceRef>,
    },
}

/// The current state of a resource could not be determined.
#[derive(Debug, Error)]
#[error("cannot determine state of {resource}: {source:#}")]
pub struct GuardError {
    /// Resource whose guard failed
    pub resource: ResourceRef,
    /// Underlying collaborator failure
    #[source]
    pub source: anyhow::Error,
}

/// An action could not be carried out.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A collaborator failed before producing an exit status
    #[error("{resource}: {source:#}")]
    Collaborator {
        /// Resource being converged
        resource: ResourceRef,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// An input the action needs was not supplied by the caller
    #[error("{resource}: missing input {what}")]
    MissingInput {
        /// Resource being converged
        resource: ResourceRef,
        /// Description of the missing input
        what: String,
    },
}

fn recipe_suffix(recipe: Option<&str>) -> String {
    recipe.map(|r| format!(" in recipe '{r}'")).unwrap_or_default()
}

fn join_refs(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
