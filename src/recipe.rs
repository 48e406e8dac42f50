//! Recipes from a directory of TOML files
//!
//! A recipe named `account` lives in `<dir>/account.toml` or
//! `<dir>/account/recipe.toml` and holds an array of `[[resource]]`
//! tables. String values may reference node attributes as
//! `${node.<key>}`, with dotted keys for nested tables.

use anyhow::{Context, Result};
use convergence::{Declaration, RecipeBook};
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RESOURCE_KEY: &str = "resource";

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe '{0}' not found in {1}")]
    NotFound(String, PathBuf),

    #[error("invalid recipe name '{0}'")]
    InvalidName(String),

    #[error("recipe '{recipe}' references unknown node attribute '{attribute}'")]
    UnknownAttribute { recipe: String, attribute: String },

    #[error("node attribute '{attribute}' cannot be interpolated into a string in '{recipe}'")]
    NotScalar { recipe: String, attribute: String },

    #[error("recipe '{recipe}': 'resource' must be an array of tables")]
    NotResourceArray { recipe: String },
}

pub struct DirectoryRecipes {
    dir: PathBuf,
    node: toml::Table,
    placeholder: Regex,
}

impl DirectoryRecipes {
    pub fn new(dir: impl Into<PathBuf>, node: toml::Table) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            node,
            placeholder: Regex::new(r"\$\{node\.([A-Za-z0-9_.-]+)\}")?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the named recipe, if it exists
    pub fn locate(&self, name: &str) -> Result<PathBuf, RecipeError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
        if !valid {
            return Err(RecipeError::InvalidName(name.to_string()));
        }

        [
            self.dir.join(format!("{name}.toml")),
            self.dir.join(name).join("recipe.toml"),
        ]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| RecipeError::NotFound(name.to_string(), self.dir.clone()))
    }

    fn attribute(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut value = self.node.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    /// Substitute node attributes into every string in `value`
    fn interpolate(&self, recipe: &str, value: toml::Value) -> Result<toml::Value, RecipeError> {
        match value {
            toml::Value::String(s) => self.interpolate_str(recipe, &s),
            toml::Value::Array(items) => items
                .into_iter()
                .map(|v| self.interpolate(recipe, v))
                .collect::<Result<Vec<_>, _>>()
                .map(toml::Value::Array),
            toml::Value::Table(table) => table
                .into_iter()
                .map(|(k, v)| self.interpolate(recipe, v).map(|v| (k, v)))
                .collect::<Result<toml::Table, _>>()
                .map(toml::Value::Table),
            other => Ok(other),
        }
    }

    fn interpolate_str(&self, recipe: &str, s: &str) -> Result<toml::Value, RecipeError> {
        let unknown = |attribute: &str| RecipeError::UnknownAttribute {
            recipe: recipe.to_string(),
            attribute: attribute.to_string(),
        };

        // A lone placeholder keeps the attribute's type (`gid = "${node.gid}"`)
        if let Some(caps) = self.placeholder.captures(s)
            && caps.get(0).is_some_and(|m| m.as_str() == s)
        {
            return self.attribute(&caps[1]).cloned().ok_or_else(|| unknown(&caps[1]));
        }

        let mut error = None;
        let replaced = self.placeholder.replace_all(s, |caps: &Captures| {
            let text = match self.attribute(&caps[1]) {
                Some(toml::Value::String(v)) => Some(v.clone()),
                Some(toml::Value::Integer(i)) => Some(i.to_string()),
                Some(toml::Value::Float(f)) => Some(f.to_string()),
                Some(toml::Value::Boolean(b)) => Some(b.to_string()),
                Some(_) => {
                    error.get_or_insert(RecipeError::NotScalar {
                        recipe: recipe.to_string(),
                        attribute: caps[1].to_string(),
                    });
                    None
                }
                None => {
                    error.get_or_insert(unknown(&caps[1]));
                    None
                }
            };
            text.unwrap_or_default()
        });

        match error {
            Some(e) => Err(e),
            None => Ok(toml::Value::String(replaced.into_owned())),
        }
    }

    /// Parse recipe text into declarations
    pub fn parse(&self, name: &str, text: &str) -> Result<Vec<Declaration>> {
        let mut document: toml::Table =
            toml::from_str(text).with_context(|| format!("Invalid TOML in recipe '{name}'"))?;

        let Some(resources) = document.remove(RESOURCE_KEY) else {
            return Ok(Vec::new());
        };
        let toml::Value::Array(resources) = resources else {
            return Err(RecipeError::NotResourceArray {
                recipe: name.to_string(),
            }
            .into());
        };

        let mut declarations = Vec::with_capacity(resources.len());
        for resource in resources {
            let toml::Value::Table(table) = self.interpolate(name, resource)? else {
                return Err(RecipeError::NotResourceArray {
                    recipe: name.to_string(),
                }
                .into());
            };
            declarations.push(Declaration::from_table(table, Some(name))?);
        }
        Ok(declarations)
    }
}

impl RecipeBook for DirectoryRecipes {
    fn load(&self, name: &str) -> Result<Vec<Declaration>> {
        let path = self.locate(name)?;
        log::debug!("loading recipe {name} from {}", path.display());
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        self.parse(name, &text)
    }
}
