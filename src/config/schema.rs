//! Benchmark configuration schemas and per-run validation.
//!
//! A benchmark declares which keys its container needs ([`ConfigSchema`]). Before a
//! container is started, the caller's params plus task-specific overrides are
//! checked against that schema and frozen into a [`RunConfig`].
//!
//! Schemas can be written in YAML:
//!
//! ```yaml
//! required:
//!   - OPENAI_API_KEY
//! optional:
//!   - MAX_STEPS: 30
//!   - SPLIT: test
//!   - PROXY: null
//! ```
//!
//! `optional` may also be a plain mapping. A `null` default declares an optional
//! key without a default value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raw parameters as supplied by the caller.
pub type Params = BTreeMap<String, ConfigValue>;

/// A single configuration value. Stringified only at the container boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl ConfigValue {
    /// Whether the value counts as unset for a required key.
    pub fn is_empty(&self) -> bool {
        matches!(self, ConfigValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Number(n) => write!(f, "{n}"),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Number(value.into())
    }
}

impl From<u64> for ConfigValue {
    fn from(value: u64) -> Self {
        ConfigValue::Number(value.into())
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// Declared configuration keys for one benchmark.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
    defaults: BTreeMap<String, ConfigValue>,
}

/// On-disk shape of a schema document.
#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    optional: Option<serde_yaml::Value>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required key.
    pub fn require(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.optional_keys.remove(&key);
        self.required_keys.insert(key);
        self
    }

    /// Adds an optional key without a default.
    pub fn optional(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.required_keys.contains(&key) {
            self.optional_keys.insert(key);
        }
        self
    }

    /// Adds an optional key with a default value.
    ///
    /// A default on a required key is allowed and satisfies the requirement.
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        let key = key.into();
        if !self.required_keys.contains(&key) {
            self.optional_keys.insert(key.clone());
        }
        self.defaults.insert(key, value.into());
        self
    }

    pub fn required_keys(&self) -> &BTreeSet<String> {
        &self.required_keys
    }

    pub fn optional_keys(&self) -> &BTreeSet<String> {
        &self.optional_keys
    }

    pub fn defaults(&self) -> &BTreeMap<String, ConfigValue> {
        &self.defaults
    }

    /// Parses a schema from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let doc: SchemaDocument = serde_yaml::from_str(yaml)?;
        let mut schema = doc
            .required
            .into_iter()
            .fold(Self::new(), |schema, key| schema.require(key));

        match doc.optional {
            None | Some(serde_yaml::Value::Null) => {}
            Some(serde_yaml::Value::Mapping(map)) => {
                schema = schema.merge_optional(map)?;
            }
            Some(serde_yaml::Value::Sequence(entries)) => {
                for entry in entries {
                    match entry {
                        serde_yaml::Value::Mapping(map) => {
                            schema = schema.merge_optional(map)?;
                        }
                        other => {
                            return Err(ConfigError::InvalidSchema(format!(
                                "optional entries must be single-key maps, got {other:?}"
                            )));
                        }
                    }
                }
            }
            Some(other) => {
                return Err(ConfigError::InvalidSchema(format!(
                    "optional must be a map or a list of maps, got {other:?}"
                )));
            }
        }

        Ok(schema)
    }

    /// Reads and parses a YAML schema file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    fn merge_optional(mut self, map: serde_yaml::Mapping) -> Result<Self, ConfigError> {
        for (key, value) in map {
            let key = match key {
                serde_yaml::Value::String(s) => s,
                other => {
                    return Err(ConfigError::InvalidSchema(format!(
                        "optional key must be a string, got {other:?}"
                    )));
                }
            };
            let default: Option<ConfigValue> = serde_yaml::from_value(value).map_err(|e| {
                ConfigError::InvalidSchema(format!("default for {key} is not a scalar: {e}"))
            })?;
            self = match default {
                Some(value) => self.with_default(key, value),
                None => self.optional(key),
            };
        }
        Ok(self)
    }

    /// Validates raw params against this schema. See [`validate`].
    pub fn validate(&self, raw: &Params, task_id: &str) -> Result<RunConfig, ConfigError> {
        let mut values = raw.clone();
        for (key, default) in &self.defaults {
            values
                .entry(key.clone())
                .or_insert_with(|| default.clone());
        }

        // BTreeSet iteration keeps the reported key deterministic.
        for key in &self.required_keys {
            match values.get(key) {
                Some(value) if !value.is_empty() => {}
                _ => return Err(ConfigError::MissingRequired(key.clone())),
            }
        }

        Ok(RunConfig {
            task_id: task_id.to_string(),
            values,
        })
    }
}

/// Validates raw params for one task and freezes them into a [`RunConfig`].
///
/// Defaults fill absent keys; a required key that is absent or empty after
/// defaulting fails with [`ConfigError::MissingRequired`]. Unknown keys are kept.
pub fn validate(schema: &ConfigSchema, raw: &Params, task_id: &str) -> Result<RunConfig, ConfigError> {
    schema.validate(raw, task_id)
}

/// Validated, immutable configuration for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    task_id: String,
    values: BTreeMap<String, ConfigValue>,
}

impl RunConfig {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Values rendered as strings, keyed by name.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    /// Values rendered as `KEY=value` entries for the container environment.
    pub fn to_env(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}
