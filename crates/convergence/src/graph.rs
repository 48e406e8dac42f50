//! Resource graph builder
//!
//! Turns an ordered list of declarations into a [`ResourceGraph`]:
//!
//! 1. Include directives are expanded depth-first, splicing the included
//!    recipe at the point of inclusion. Each recipe is expanded at most
//!    once per run.
//! 2. Each raw declaration is validated into a typed [`Resource`].
//! 3. A later declaration with the same `kind[identifier]` replaces the
//!    earlier one in place.
//! 4. `depends_on` and `notifies` references are resolved.
//! 5. The execution order is computed with a stable topological sort:
//!    among the resources whose dependencies are done, the one declared
//!    first always goes next. Without explicit dependencies this is the
//!    declaration order.

use crate::declaration::{Declaration, RawResource, RecipeBook};
use crate::error::GraphError;
use crate::properties::{Properties, PropertiesError};
use crate::resource::{Condition, Guard, Reference, Resource, ResourceKind, ResourceRef};
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;

/// Keys every declaration may carry in addition to its kind's attributes
const OPTION_KEYS: [&str; 8] = [
    "depends_on",
    "notifies",
    "not_if",
    "only_if",
    "not_if_exists",
    "only_if_exists",
    "returns",
    "ignore_failure",
];

/// Resources in a fixed execution order, with resolved relations
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Resources in declaration order (after redefinition)
    resources: Vec<Resource>,
    /// For each resource, the indices it depends on
    dependencies: Vec<Vec<usize>>,
    /// For each resource, the indices it notifies after converging
    notifications: Vec<Vec<usize>>,
    /// Execution order as indices into `resources`
    order: Vec<usize>,
}

impl ResourceGraph {
    /// Build a graph from already-typed resources
    ///
    /// Applies the same redefinition, reference resolution and ordering
    /// rules as [`GraphBuilder::build`].
    pub fn from_resources(
        resources: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, GraphError> {
        let mut kept: Vec<Resource> = Vec::new();
        let mut positions: HashMap<ResourceRef, usize> = HashMap::new();

        for resource in resources {
            if let Some(&index) = positions.get(resource.reference()) {
                log::debug!("{} redefined, keeping the later declaration", resource);
                kept[index] = resource;
            } else {
                positions.insert(resource.reference().clone(), kept.len());
                kept.push(resource);
            }
        }

        let resolver = Resolver::new(&kept, &positions);
        let mut dependencies = Vec::with_capacity(kept.len());
        let mut notifications = Vec::with_capacity(kept.len());
        for resource in &kept {
            dependencies.push(resolver.resolve_all(resource, resource.depends_on())?);
            notifications.push(resolver.resolve_all(resource, resource.notifies())?);
        }

        let order = topological_order(&kept, &dependencies)?;

        Ok(Self {
            resources: kept,
            dependencies,
            notifications,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resource at a declaration index
    pub fn get(&self, index: usize) -> &Resource {
        &self.resources[index]
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Execution order as declaration indices
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Resources in execution order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.order.iter().map(|&i| &self.resources[i])
    }

    pub fn position(&self, reference: &ResourceRef) -> Option<usize> {
        self.resources.iter().position(|r| r.reference() == reference)
    }

    pub fn dependencies_of(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn notifications_of(&self, index: usize) -> &[usize] {
        &self.notifications[index]
    }
}

/// Expands and validates declarations into a [`ResourceGraph`]
pub struct GraphBuilder<'a> {
    recipes: &'a dyn RecipeBook,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(recipes: &'a dyn RecipeBook) -> Self {
        Self { recipes }
    }

    /// Build the graph for a run
    pub fn build(&self, declared: Vec<Declaration>) -> Result<ResourceGraph, GraphError> {
        let mut included = HashSet::new();
        let mut expanded = Vec::new();
        self.expand(declared, None, &mut included, &mut expanded)?;

        let resources = expanded
            .into_iter()
            .map(|(raw, recipe)| parse_resource(raw, recipe.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        let graph = ResourceGraph::from_resources(resources)?;
        log::debug!(
            "built graph with {} resources from {} recipes",
            graph.len(),
            included.len()
        );
        Ok(graph)
    }

    /// Build the graph for a run list of recipe names
    pub fn build_run_list(&self, run_list: &[String]) -> Result<ResourceGraph, GraphError> {
        self.build(
            run_list
                .iter()
                .map(|name| Declaration::Include(name.clone()))
                .collect(),
        )
    }

    fn expand(
        &self,
        declared: Vec<Declaration>,
        recipe: Option<&str>,
        included: &mut HashSet<String>,
        out: &mut Vec<(RawResource, Option<String>)>,
    ) -> Result<(), GraphError> {
        for declaration in declared {
            match declaration {
                Declaration::Resource(raw) => out.push((raw, recipe.map(str::to_string))),
                Declaration::Include(name) => {
                    if !included.insert(name.clone()) {
                        log::debug!("recipe '{name}' already included");
                        continue;
                    }
                    let nested = self.recipes.load(&name).map_err(|e| GraphError::Recipe {
                        name: name.clone(),
                        message: format!("{e:#}"),
                    })?;
                    self.expand(nested, Some(&name), included, out)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Declaration parsing
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// Engine options shared by every kind
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EngineOptions {
    depends_on: OneOrMany<String>,
    notifies: OneOrMany<String>,
    not_if: Option<String>,
    only_if: Option<String>,
    not_if_exists: Option<PathBuf>,
    only_if_exists: Option<PathBuf>,
    returns: Option<OneOrMany<i32>>,
    ignore_failure: bool,
}

impl EngineOptions {
    /// Remove the option keys from an attribute table and parse them
    fn extract(attributes: &mut toml::Table) -> Result<Self, String> {
        let mut options = toml::Table::new();
        for key in OPTION_KEYS {
            if let Some(value) = attributes.remove(key) {
                options.insert(key.to_string(), value);
            }
        }
        toml::Value::Table(options)
            .try_into()
            .map_err(|e: toml::de::Error| e.message().to_string())
    }

    fn guard(&mut self) -> Result<Option<Guard>, String> {
        let mut guards = Vec::new();
        if let Some(cmd) = self.not_if.take() {
            guards.push(Guard::NotIf(Condition::Command(cmd)));
        }
        if let Some(cmd) = self.only_if.take() {
            guards.push(Guard::OnlyIf(Condition::Command(cmd)));
        }
        if let Some(path) = self.not_if_exists.take() {
            guards.push(Guard::NotIf(Condition::PathExists(path)));
        }
        if let Some(path) = self.only_if_exists.take() {
            guards.push(Guard::OnlyIf(Condition::PathExists(path)));
        }

        match guards.len() {
            0 | 1 => Ok(guards.pop()),
            _ => Err("at most one of not_if, only_if, not_if_exists, only_if_exists".to_string()),
        }
    }
}

fn parse_resource(raw: RawResource, recipe: Option<&str>) -> Result<Resource, GraphError> {
    let RawResource {
        type_name,
        identifier,
        mut attributes,
    } = raw;

    let kind = Properties::kind_of(&type_name).ok_or_else(|| GraphError::UnknownKind {
        kind: type_name.clone(),
        identifier: identifier.clone(),
    })?;
    let reference = ResourceRef::new(kind, identifier.clone());
    let invalid = |message: String| GraphError::InvalidResource {
        resource: reference.clone(),
        message,
    };

    let mut options = EngineOptions::extract(&mut attributes).map_err(&invalid)?;
    let guard = options.guard().map_err(&invalid)?;

    if options.returns.is_some() && !matches!(kind, ResourceKind::Execute | ResourceKind::Service)
    {
        return Err(invalid(
            "returns is only valid for execute, bash and service resources".to_string(),
        ));
    }

    let properties =
        Properties::parse(&type_name, &identifier, attributes).map_err(|e| match e {
            PropertiesError::UnknownType => GraphError::UnknownKind {
                kind: type_name.clone(),
                identifier: identifier.clone(),
            },
            PropertiesError::Invalid(message) => invalid(message),
        })?;

    let mut resource = Resource::new(identifier, properties);
    if let Some(guard) = guard {
        resource = resource.with_guard(guard);
    }
    if let Some(codes) = options.returns {
        resource = resource.accepting(codes.into_vec());
    }
    if options.ignore_failure {
        resource = resource.ignoring_failure();
    }
    for text in options.depends_on.into_vec() {
        resource = resource.depending_on(Reference::parse(&text).map_err(&invalid)?);
    }
    for text in options.notifies.into_vec() {
        resource = resource.notifying(Reference::parse(&text).map_err(&invalid)?);
    }
    if let Some(recipe) = recipe {
        resource = resource.from_recipe(recipe);
    }

    Ok(resource)
}

// ============================================================================
// Reference resolution and ordering
// ============================================================================

struct Resolver<'g> {
    resources: &'g [Resource],
    positions: &'g HashMap<ResourceRef, usize>,
    by_identifier: HashMap<&'g str, Vec<usize>>,
}

impl<'g> Resolver<'g> {
    fn new(resources: &'g [Resource], positions: &'g HashMap<ResourceRef, usize>) -> Self {
        let mut by_identifier: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, resource) in resources.iter().enumerate() {
            by_identifier
                .entry(resource.identifier())
                .or_default()
                .push(index);
        }
        Self {
            resources,
            positions,
            by_identifier,
        }
    }

    fn resolve(&self, from: &Resource, reference: &Reference) -> Result<usize, GraphError> {
        let unknown = || GraphError::UnknownReference {
            from: from.reference().clone(),
            reference: reference.to_string(),
        };

        match reference {
            Reference::Qualified(target) => self.positions.get(target).copied().ok_or_else(unknown),
            Reference::Bare(identifier) => {
                match self.by_identifier.get(identifier.as_str()).map(Vec::as_slice) {
                    None | Some([]) => Err(unknown()),
                    Some([index]) => Ok(*index),
                    Some(candidates) => Err(GraphError::AmbiguousReference {
                        from: from.reference().clone(),
                        reference: identifier.clone(),
                        candidates: candidates
                            .iter()
                            .map(|&i| self.resources[i].reference().clone())
                            .collect(),
                    }),
                }
            }
        }
    }

    fn resolve_all(
        &self,
        from: &Resource,
        references: &[Reference],
    ) -> Result<Vec<usize>, GraphError> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            let index = self.resolve(from, reference)?;
            if !resolved.contains(&index) {
                resolved.push(index);
            }
        }
        Ok(resolved)
    }
}

/// Stable Kahn sort: the ready resource with the lowest declaration index
/// always goes first.
fn topological_order(
    resources: &[Resource],
    dependencies: &[Vec<usize>],
) -> Result<Vec<usize>, GraphError> {
    let count = resources.len();
    let mut pending: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (index, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(index);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &dependent in &dependents[index] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < count {
        let members = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .map(|(i, _)| resources[i].reference().clone())
            .collect();
        return Err(GraphError::Cycle { members });
    }

    Ok(order)
}
