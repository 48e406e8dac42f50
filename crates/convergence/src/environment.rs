//! Environment mappings
//!
//! Anything that needs environment variables gets them as an explicit
//! [`EnvironmentMapping`] value: the caller snapshots the invoking
//! environment once and passes it in, and `KEY=value` files are parsed
//! into the same type.

use serde::Serialize;
use std::collections::BTreeMap;

/// Ordered `KEY -> value` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentMapping {
    vars: BTreeMap<String, String>,
}

impl EnvironmentMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `KEY=value` file
    ///
    /// Blank lines and `#` comments are skipped, an `export ` prefix is
    /// allowed and one level of matching single or double quotes around
    /// the value is removed. Lines without `=` are reported by number.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut vars = BTreeMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {}: expected KEY=value", number + 1));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {}: empty variable name", number + 1));
            }
            vars.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Overlay `other` on top of this mapping
    pub fn extend(&mut self, other: &Self) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
