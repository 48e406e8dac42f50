//! Raw declarations and recipe lookup
//!
//! A recipe is an ordered list of [`Declaration`]s: either a resource with
//! a loose attribute table, or a directive to include another recipe at
//! that point. Nothing here is validated beyond its shape; typing happens
//! in the graph builder.

use crate::error::GraphError;
use anyhow::Result;
use std::collections::HashMap;

/// Key holding the declaration type (`package`, `bash`, ...)
pub const TYPE_KEY: &str = "type";
/// Key holding the resource identifier
pub const NAME_KEY: &str = "name";
/// Key marking an include directive
pub const INCLUDE_KEY: &str = "include";

/// A declared resource before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawResource {
    /// Declaration type as written
    pub type_name: String,
    pub identifier: String,
    /// Every other key, engine options included
    pub attributes: toml::Table,
}

impl RawResource {
    pub fn new(type_name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            identifier: identifier.into(),
            attributes: toml::Table::new(),
        }
    }

    /// Add an attribute (builder style, used by tests and embedders)
    pub fn attr(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// One entry of a recipe
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Resource(RawResource),
    /// Splice the named recipe here (once per run)
    Include(String),
}

impl Declaration {
    /// Interpret a `[[resource]]` table from a recipe file
    ///
    /// A table is either `{ include = "name" }` or carries `type` and
    /// `name` plus attributes.
    pub fn from_table(
        mut table: toml::Table,
        recipe: Option<&str>,
    ) -> Result<Self, GraphError> {
        let malformed = |message: String| GraphError::Malformed {
            recipe: recipe.map(str::to_string),
            message,
        };

        if let Some(include) = table.remove(INCLUDE_KEY) {
            if !table.is_empty() {
                let extra: Vec<_> = table.keys().cloned().collect();
                return Err(malformed(format!(
                    "include directive takes no other keys (found {})",
                    extra.join(", ")
                )));
            }
            return match include {
                toml::Value::String(name) if !name.trim().is_empty() => {
                    Ok(Self::Include(name.trim().to_string()))
                }
                other => Err(malformed(format!(
                    "include must be a recipe name, got {other}"
                ))),
            };
        }

        let type_name = take_string(&mut table, TYPE_KEY).map_err(&malformed)?;
        let identifier = take_string(&mut table, NAME_KEY)
            .map_err(|m| malformed(format!("{type_name}: {m}")))?;

        Ok(Self::Resource(RawResource {
            type_name,
            identifier,
            attributes: table,
        }))
    }
}

fn take_string(table: &mut toml::Table, key: &str) -> Result<String, String> {
    match table.remove(key) {
        Some(toml::Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(other) => Err(format!("'{key}' must be a non-empty string, got {other}")),
        None => Err(format!("missing '{key}'")),
    }
}

/// Source of recipes for include directives
pub trait RecipeBook {
    /// Load the declarations of the named recipe
    fn load(&self, name: &str) -> Result<Vec<Declaration>>;
}

/// Recipes held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MemoryRecipes {
    recipes: HashMap<String, Vec<Declaration>>,
}

impl MemoryRecipes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, declarations: Vec<Declaration>) {
        self.recipes.insert(name.into(), declarations);
    }

    pub fn with(mut self, name: impl Into<String>, declarations: Vec<Declaration>) -> Self {
        self.insert(name, declarations);
        self
    }
}

impl RecipeBook for MemoryRecipes {
    fn load(&self, name: &str) -> Result<Vec<Declaration>> {
        self.recipes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no recipe named '{name}'"))
    }
}

/// A book with no recipes; every include fails
pub struct NoRecipes;

impl RecipeBook for NoRecipes {
    fn load(&self, name: &str) -> Result<Vec<Declaration>> {
        anyhow::bail!("no recipe named '{name}'")
    }
}
