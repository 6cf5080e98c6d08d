//! Module Action Contracts
//!
//! Every module lives in `<modules_dir>/<kind>/<module>/` and holds one script
//! per action (`init`, `post`) plus an optional `module.json` descriptor that
//! declares what each action needs before it may run:
//!
//! ```json
//! {
//!   "actions": {
//!     "init": { "required_params": ["region"], "required_cmds": ["az"] },
//!     "post": { "required_params": [], "required_cmds": [] }
//!   }
//! }
//! ```
//!
//! Modules without a descriptor declare their needs in the script header:
//!
//! ```bash
//! #_PARAMS region resource_group
//! #_CMDS az kubectl
//! ```
//!
//! A missing script, or a descriptor with no entry for the action, resolves to
//! `None`: the action is an optional hook and the run skips it. A descriptor
//! that exists but cannot be parsed is a fatal configuration error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::params::is_valid_param_name;

/// Descriptor file name inside a module directory
pub const DESCRIPTOR_FILE: &str = "module.json";

const PARAMS_HEADER: &str = "#_PARAMS";
const CMDS_HEADER: &str = "#_CMDS";

/// Which scope a module implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ModuleKind {
    Env,
    Target,
}

/// A step within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ActionName {
    Init,
    Post,
}

/// Identity of one action: (kind, module, action)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub kind: ModuleKind,
    pub module: String,
    pub action: ActionName,
}

impl ActionId {
    pub fn new(kind: ModuleKind, module: impl Into<String>, action: ActionName) -> Self {
        Self {
            kind,
            module: module.into(),
            action,
        }
    }

    /// Directory holding the module's scripts and descriptor
    pub fn module_dir(&self, modules_dir: &Path) -> PathBuf {
        modules_dir.join(self.kind.as_ref()).join(&self.module)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.module, self.action)
    }
}

/// What an action needs before it may run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, alias = "requiredParams")]
    pub required_params: Vec<String>,

    #[serde(default, alias = "requiredCmds")]
    pub required_cmds: Vec<String>,
}

impl ActionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter
    pub fn require_param(mut self, name: impl Into<String>) -> Self {
        self.required_params.push(name.into());
        self
    }

    /// Add a required command
    pub fn require_cmd(mut self, name: impl Into<String>) -> Self {
        self.required_cmds.push(name.into());
        self
    }

    /// Read `#_PARAMS` / `#_CMDS` header lines from a script.
    ///
    /// Each header line lists space-separated names; repeated lines accumulate.
    pub fn from_script_headers(script: &str) -> Self {
        let mut spec = Self::new();
        for line in script.lines() {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix(PARAMS_HEADER) {
                spec.required_params
                    .extend(rest.split_whitespace().map(str::to_string));
            } else if let Some(rest) = line.strip_prefix(CMDS_HEADER) {
                spec.required_cmds
                    .extend(rest.split_whitespace().map(str::to_string));
            }
        }
        spec
    }

    fn validate_structure(&self, action: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.required_params {
            if !is_valid_param_name(name) {
                return Err(DeployError::config(format!(
                    "Action '{}' requires invalid parameter name '{}'",
                    action, name
                )));
            }
            if !seen.insert(name) {
                return Err(DeployError::config(format!(
                    "Action '{}' lists required parameter '{}' twice",
                    action, name
                )));
            }
        }

        let mut seen = HashSet::new();
        for name in &self.required_cmds {
            if name.trim().is_empty() {
                return Err(DeployError::config(format!(
                    "Action '{}' lists an empty required command",
                    action
                )));
            }
            if !seen.insert(name) {
                return Err(DeployError::config(format!(
                    "Action '{}' lists required command '{}' twice",
                    action, name
                )));
            }
        }

        Ok(())
    }
}

/// Static metadata for one module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
}

impl ModuleDescriptor {
    /// Load a descriptor from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(json)
            .map_err(|e| DeployError::config(format!("Invalid module descriptor: {}", e)))?;
        descriptor.validate_structure()?;
        Ok(descriptor)
    }

    /// Load a descriptor from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content).map_err(|e| match e {
            DeployError::ConfigLoad(msg) => {
                DeployError::config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    fn validate_structure(&self) -> Result<()> {
        for (action, spec) in &self.actions {
            spec.validate_structure(action)?;
        }
        Ok(())
    }

    pub fn action(&self, action: ActionName) -> Option<&ActionSpec> {
        self.actions.get(action.as_ref())
    }
}

/// An action that exists on disk, ready for validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub id: ActionId,
    pub script_path: PathBuf,
    pub spec: ActionSpec,
}

/// Locates action scripts and their declared requirements
#[derive(Debug, Clone)]
pub struct DescriptorResolver {
    modules_dir: PathBuf,
}

impl DescriptorResolver {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Find the script for an action: `<action>` first, then `<action>.sh`
    pub fn script_path(&self, id: &ActionId) -> Option<PathBuf> {
        let dir = id.module_dir(&self.modules_dir);
        let bare = dir.join(id.action.as_ref());
        if bare.is_file() {
            return Some(bare);
        }
        let with_ext = dir.join(format!("{}.sh", id.action));
        with_ext.is_file().then_some(with_ext)
    }

    /// Resolve an action to its script and spec.
    ///
    /// Returns `Ok(None)` when the script is absent or the module's descriptor
    /// has no entry for the action. A descriptor that exists is always parsed,
    /// so a broken one fails even when no script is present.
    pub fn resolve(&self, id: &ActionId) -> Result<Option<ResolvedAction>> {
        let descriptor_path = id.module_dir(&self.modules_dir).join(DESCRIPTOR_FILE);
        let descriptor = if descriptor_path.exists() {
            Some(ModuleDescriptor::from_file(&descriptor_path)?)
        } else {
            None
        };

        let Some(script_path) = self.script_path(id) else {
            debug!("No script for {} under {}", id, self.modules_dir.display());
            return Ok(None);
        };

        let spec = if let Some(descriptor) = descriptor {
            match descriptor.action(id.action) {
                Some(spec) => spec.clone(),
                None => {
                    debug!("{} declares no '{}' action", descriptor_path.display(), id.action);
                    return Ok(None);
                }
            }
        } else {
            let script = std::fs::read_to_string(&script_path).map_err(|e| {
                DeployError::config(format!("Failed to read {}: {}", script_path.display(), e))
            })?;
            let spec = ActionSpec::from_script_headers(&script);
            spec.validate_structure(id.action.as_ref())?;
            spec
        };

        debug!(
            "Resolved {} -> {} (params={:?}, cmds={:?})",
            id,
            script_path.display(),
            spec.required_params,
            spec.required_cmds
        );

        Ok(Some(ResolvedAction {
            id: id.clone(),
            script_path,
            spec,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_kind_and_action_strings() {
        assert_eq!(ModuleKind::Env.to_string(), "env");
        assert_eq!("target".parse::<ModuleKind>().unwrap(), ModuleKind::Target);
        assert_eq!(ActionName::Post.as_ref(), "post");
        assert!("deploy".parse::<ActionName>().is_err());
    }

    #[test]
    fn test_action_id_display_and_dir() {
        let id = ActionId::new(ModuleKind::Target, "aks", ActionName::Init);
        assert_eq!(id.to_string(), "target/aks/init");
        assert_eq!(
            id.module_dir(Path::new("modules")),
            PathBuf::from("modules/target/aks")
        );
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{
            "actions": {
                "init": { "required_params": ["region"], "required_cmds": ["az"] },
                "post": {}
            }
        }"#;

        let descriptor = ModuleDescriptor::from_json(json).unwrap();
        let init = descriptor.action(ActionName::Init).unwrap();
        assert_eq!(init.required_params, vec!["region"]);
        assert_eq!(init.required_cmds, vec!["az"]);
        assert_eq!(descriptor.action(ActionName::Post), Some(&ActionSpec::new()));
    }

    #[test]
    fn test_descriptor_accepts_camel_case() {
        let json = r#"{"actions": {"init": {"requiredParams": ["a"], "requiredCmds": ["b"]}}}"#;
        let descriptor = ModuleDescriptor::from_json(json).unwrap();
        let init = descriptor.action(ActionName::Init).unwrap();
        assert_eq!(init, &ActionSpec::new().require_param("a").require_cmd("b"));
    }

    #[test]
    fn test_descriptor_duplicate_names_rejected() {
        let json = r#"{"actions": {"init": {"required_params": ["a", "a"]}}}"#;
        assert!(matches!(
            ModuleDescriptor::from_json(json),
            Err(DeployError::ConfigLoad(_))
        ));

        let json = r#"{"actions": {"init": {"required_cmds": ["az", "az"]}}}"#;
        assert!(ModuleDescriptor::from_json(json).is_err());
    }

    #[test]
    fn test_descriptor_invalid_param_name_rejected() {
        let json = r#"{"actions": {"init": {"required_params": ["not-valid"]}}}"#;
        assert!(ModuleDescriptor::from_json(json).is_err());
    }

    #[test]
    fn test_script_headers() {
        let script = "#!/bin/bash\n#_PARAMS region  group\n#_CMDS az\n#_PARAMS token\necho hi\n";
        let spec = ActionSpec::from_script_headers(script);
        assert_eq!(spec.required_params, vec!["region", "group", "token"]);
        assert_eq!(spec.required_cmds, vec!["az"]);

        assert_eq!(ActionSpec::from_script_headers("echo hi\n"), ActionSpec::new());
    }

    #[test]
    fn test_resolve_missing_script_is_none() {
        let dir = TempDir::new().unwrap();
        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Env, "aks", ActionName::Init);

        assert_eq!(resolver.resolve(&id).unwrap(), None);
    }

    #[test]
    fn test_resolve_with_descriptor() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("env/aks/init"), "echo init\n");
        write(
            &dir.path().join("env/aks/module.json"),
            r#"{"actions": {"init": {"required_params": ["region"]}}}"#,
        );

        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Env, "aks", ActionName::Init);
        let resolved = resolver.resolve(&id).unwrap().unwrap();

        assert_eq!(resolved.script_path, dir.path().join("env/aks/init"));
        assert_eq!(resolved.spec.required_params, vec!["region"]);
    }

    #[test]
    fn test_resolve_action_absent_from_descriptor_is_none() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("env/aks/post"), "echo post\n");
        write(
            &dir.path().join("env/aks/module.json"),
            r#"{"actions": {"init": {}}}"#,
        );

        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Env, "aks", ActionName::Post);
        assert_eq!(resolver.resolve(&id).unwrap(), None);
    }

    #[test]
    fn test_resolve_unparsable_descriptor_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("env/aks/init"), "echo init\n");
        write(&dir.path().join("env/aks/module.json"), "{ not json");

        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Env, "aks", ActionName::Init);
        assert!(matches!(resolver.resolve(&id), Err(DeployError::ConfigLoad(_))));
    }

    #[test]
    fn test_unparsable_descriptor_is_fatal_without_scripts() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("target/web/module.json"), "{ not json");

        let resolver = DescriptorResolver::new(dir.path());
        for action in [ActionName::Init, ActionName::Post] {
            let id = ActionId::new(ModuleKind::Target, "web", action);
            assert!(matches!(resolver.resolve(&id), Err(DeployError::ConfigLoad(_))));
        }
    }

    #[test]
    fn test_resolve_sh_suffix_with_headers() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("target/web/init.sh"),
            "#_PARAMS image\n#_CMDS docker\necho deploy\n",
        );

        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Target, "web", ActionName::Init);
        let resolved = resolver.resolve(&id).unwrap().unwrap();

        assert_eq!(resolved.script_path, dir.path().join("target/web/init.sh"));
        assert_eq!(
            resolved.spec,
            ActionSpec::new().require_param("image").require_cmd("docker")
        );
    }

    #[test]
    fn test_bare_script_preferred_over_sh() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("env/aks/init"), "echo bare\n");
        write(&dir.path().join("env/aks/init.sh"), "echo suffixed\n");

        let resolver = DescriptorResolver::new(dir.path());
        let id = ActionId::new(ModuleKind::Env, "aks", ActionName::Init);
        assert_eq!(
            resolver.script_path(&id),
            Some(dir.path().join("env/aks/init"))
        );
    }
}
