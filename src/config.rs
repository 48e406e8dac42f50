use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory
pub const LOCAL_CONFIG: &str = "converge.toml";

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("converge"))
}

/// Run configuration (`converge.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Directory holding the recipes
    pub recipe_dir: PathBuf,
    /// Recipes to apply, in order
    pub run_list: Vec<String>,
    /// Node attributes available to recipes as `${node.<key>}`
    pub node: toml::Table,
    /// Where to write the JSON run report
    pub report: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recipe_dir: PathBuf::from("recipes"),
            run_list: Vec::new(),
            node: toml::Table::new(),
            report: None,
        }
    }
}

impl RunConfig {
    /// Load the configuration
    ///
    /// An explicit path must exist. Otherwise `./converge.toml`, then
    /// `~/.config/converge/config.toml`, then defaults relative to the
    /// working directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.is_file() {
            return Self::load_from(&local);
        }
        if let Ok(dir) = config_dir() {
            let global = dir.join("config.toml");
            if global.is_file() {
                return Self::load_from(&global);
            }
        }

        log::debug!("no configuration file, using defaults");
        Ok(Self::default())
    }

    /// Load a config file; relative paths in it are relative to its directory
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        let base = path.parent().unwrap_or(Path::new("."));
        config.recipe_dir = resolve(base, &config.recipe_dir);
        config.report = config.report.map(|r| resolve(base, &r));
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply a `key=value` node override; dotted keys address nested tables
    pub fn set_node(&mut self, assignment: &str) -> Result<()> {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("Expected key=value, got '{assignment}'");
        };
        let path: Vec<&str> = key.trim().split('.').collect();
        if path.iter().any(|p| p.is_empty()) {
            bail!("Invalid node attribute name '{}'", key.trim());
        }

        let (last, parents) = path.split_last().context("Empty node attribute name")?;
        let mut table = &mut self.node;
        for part in parents {
            let entry = table
                .entry(part.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            let toml::Value::Table(inner) = entry else {
                bail!("Node attribute '{part}' is not a table");
            };
            table = inner;
        }
        table.insert(last.to_string(), toml::Value::String(value.to_string()));
        Ok(())
    }
}

/// Expand `~` and anchor relative paths at `base`
fn resolve(base: &Path, path: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
