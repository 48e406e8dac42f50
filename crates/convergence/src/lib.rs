//! # Convergence
//!
//! A single-host convergence engine.
//!
//! Recipes declare the desired state of a machine as an ordered list of
//! resources. The engine checks each resource against the host and acts
//! only where the host differs, so a second run on a converged host
//! changes nothing.
//!
//! ## Core Concepts
//!
//! - **Resource**: one declared unit of state (package, account, path, command, service, ...)
//! - **ResourceGraph**: resources in execution order with resolved `depends_on`/`notifies`
//! - **GuardEvaluator**: read-only check of whether a resource is already satisfied
//! - **ActionExecutor**: unconditionally applies a resource
//! - **Converger**: walks the graph, records a [`RunReport`]
//!
//! ## Example
//!
//! ```ignore
//! use convergence::{Converger, Declaration, GraphBuilder, MemoryRecipes, NoProgress};
//!
//! let recipes = MemoryRecipes::new().with("account", account_declarations);
//! let graph = GraphBuilder::new(&recipes).build(vec![Declaration::Include("account".into())])?;
//!
//! let ctx = ApplyContext { packages: &apt, accounts: &accounts, /* ... */ environment: &env };
//! let report = Converger::new(&ctx).run(&graph, &mut NoProgress);
//! println!("{:?}", report.status);
//! ```
//!
//! ## Collaborator Traits
//!
//! The engine reaches the host only through traits in [`context`]:
//! [`PackageManager`], [`AccountManager`], [`FileSystem`],
//! [`ServiceSupervisor`], [`CommandRunner`], [`SourceControl`] and
//! [`UnitRenderer`]. Commands run to completion; there is no timeout.

pub mod action;
pub mod context;
pub mod converger;
pub mod declaration;
pub mod environment;
pub mod error;
pub mod graph;
pub mod guard;
pub mod properties;
pub mod report;
pub mod resource;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use action::{ActionExecutor, ActionResult};
pub use context::{
    AccountInfo, AccountManager, AccountSpec, ApplyContext, Checkout, CheckoutSpec, CommandOutput,
    CommandRunner, CommandSpec, EntryType, ExportSpec, FileSystem, GroupInfo, GroupSpec, Metadata,
    NoProgress, Ownership, PackageManager, ProgressCallback, RenderedUnit, ServiceState,
    ServiceSupervisor, SourceControl, UnitRenderer,
};
pub use converger::{CancelToken, Converger, DRY_RUN_DETAIL, RunOptions};
pub use declaration::{Declaration, MemoryRecipes, NoRecipes, RawResource, RecipeBook};
pub use environment::EnvironmentMapping;
pub use error::{ActionError, GraphError, GuardError};
pub use graph::{GraphBuilder, ResourceGraph};
pub use guard::GuardEvaluator;
pub use properties::{Interpreter, Mode, Properties, UnitFormat};
pub use report::{ExecutionOutcome, OutcomeStatus, RunReport, RunStatus, RunSummary, Trigger};
pub use resource::{Condition, Guard, Reference, Resource, ResourceKind, ResourceRef};
