//! Environment configuration file handling.
//!
//! The environment file is a YAML document describing one deployment unit:
//!
//! ```yaml
//! name: dev
//! module: aks            # `plugin` is accepted as the historical key
//! params:
//!   region: westeurope
//! targets:
//!   web:
//!     module: webapp
//!     params:
//!       replicas: 3
//! ```
//!
//! Targets are kept in a `BTreeMap`, so every run visits them in
//! lexicographic order of their names.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DeployError, Result, ValidationError};
use crate::params::ParameterSet;

/// A deployable unit within an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Target {
    /// Assigned from the key in the owning `targets` map
    #[serde(skip)]
    pub name: String,

    #[serde(default, alias = "plugin")]
    pub module: String,

    #[serde(default, deserialize_with = "scalar_params")]
    pub params: ParameterSet,
}

/// The whole deployment unit
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "plugin")]
    pub module: String,

    #[serde(default, deserialize_with = "scalar_params")]
    pub params: ParameterSet,

    #[serde(default)]
    pub targets: BTreeMap<String, Target>,

    /// Keys this tool does not know about; reported, never fatal
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

/// Accept YAML scalars of any type as parameter values.
///
/// `replicas: 3` and `debug: true` become `"3"` and `"true"`; a bare key
/// (`token:`) becomes the empty string. Sequences and maps are rejected.
fn scalar_params<'de, D>(deserializer: D) -> std::result::Result<ParameterSet, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(D::Error::custom(format!(
                        "parameter '{}' must be a scalar value",
                        name
                    )));
                }
            };
            Ok((name, value))
        })
        .collect()
}

impl EnvironmentConfig {
    /// Parse an environment from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)
            .map_err(|e| DeployError::config(format!("Failed to parse environment YAML: {}", e)))?;

        for (name, target) in config.targets.iter_mut() {
            target.name = name.clone();
        }
        for key in config.unknown.keys() {
            warn!("Ignoring unknown environment key '{}'", key);
        }

        Ok(config)
    }

    /// Load an environment from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading environment from {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            DeployError::ConfigLoad(msg) => {
                DeployError::config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Check the structural invariants of the environment.
    ///
    /// The environment and every target need a non-empty module. All
    /// parameter names must match `[A-Za-z_]+`. The name is optional.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let env_scope = format!("environment '{}'", self.name);
        if self.module.trim().is_empty() {
            return Err(ValidationError::MissingModule { scope: env_scope });
        }
        if let Some(name) = self.params.invalid_names().next() {
            return Err(ValidationError::InvalidParamName {
                scope: env_scope,
                name: name.to_string(),
            });
        }

        for target in self.targets.values() {
            let scope = format!("target '{}'", target.name);
            if target.module.trim().is_empty() {
                return Err(ValidationError::MissingModule { scope });
            }
            if let Some(name) = target.params.invalid_names().next() {
                return Err(ValidationError::InvalidParamName {
                    scope,
                    name: name.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Target names in run order
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}
