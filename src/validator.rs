//! Pre-flight validation of an action's declared requirements.
//!
//! Validation runs before any subprocess is spawned and fails on the first
//! unmet requirement: parameters are checked first, then commands, each in
//! declaration order.

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::ValidationError;
use crate::module_manifest::ActionSpec;
use crate::params::ParameterSet;

/// Resolves command names to executables
pub trait CommandLookup {
    /// Full path of the executable `name` refers to, if any
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Searches a list of directories, like the shell does with `PATH`
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Search path of the current process (`PATH`)
    pub fn from_env() -> Self {
        Self::from_path_var(std::env::var_os("PATH").unwrap_or_default())
    }

    /// Parse a colon-separated path list
    pub fn from_path_var(path: impl Into<OsString>) -> Self {
        Self {
            dirs: std::env::split_paths(&path.into()).collect(),
        }
    }

    pub fn from_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
}

impl CommandLookup for SearchPath {
    fn find(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            let path = PathBuf::from(name);
            return is_executable(&path).then_some(path);
        }
        self.dirs
            .iter()
            // An empty PATH entry means the current directory
            .map(|dir| {
                if dir.as_os_str().is_empty() {
                    Path::new(".").join(name)
                } else {
                    dir.join(name)
                }
            })
            .find(|candidate| is_executable(candidate))
    }
}

/// Regular file with at least one execute bit set
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Check `params` and the command search path against `spec`.
pub fn validate(
    spec: &ActionSpec,
    params: &ParameterSet,
    commands: &dyn CommandLookup,
) -> Result<(), ValidationError> {
    if let Some(missing) = spec.required_params.iter().find(|name| !params.contains(name)) {
        return Err(ValidationError::MissingParam(missing.clone()));
    }

    for name in &spec.required_cmds {
        match commands.find(name) {
            Some(path) => tracing::trace!("Command {} resolved to {}", name, path.display()),
            None => return Err(ValidationError::MissingCommand(name.clone())),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_params_present() {
        let spec = ActionSpec::new().require_param("region");
        let params: ParameterSet = [("region", "us-east-1")].into_iter().collect();

        assert!(validate(&spec, &params, &SearchPath::default()).is_ok());
    }

    #[test]
    fn test_missing_param_reported_first() {
        let spec = ActionSpec::new()
            .require_param("region")
            .require_param("group")
            .require_param("token");
        let params: ParameterSet = [("region", "eu")].into_iter().collect();

        assert_eq!(
            validate(&spec, &params, &SearchPath::default()),
            Err(ValidationError::MissingParam("group".into()))
        );
    }

    #[test]
    fn test_empty_value_satisfies_requirement() {
        let spec = ActionSpec::new().require_param("token");
        let params: ParameterSet = [("token", "")].into_iter().collect();

        assert!(validate(&spec, &params, &SearchPath::default()).is_ok());
    }

    #[test]
    fn test_params_checked_before_commands() {
        let spec = ActionSpec::new().require_cmd("terraform").require_param("region");

        assert_eq!(
            validate(&spec, &ParameterSet::new(), &SearchPath::default()),
            Err(ValidationError::MissingParam("region".into()))
        );
    }

    #[test]
    fn test_missing_command() {
        let dir = TempDir::new().unwrap();
        make_executable(dir.path(), "az");
        let path = SearchPath::from_dirs([dir.path()]);
        let spec = ActionSpec::new().require_cmd("az").require_cmd("terraform");

        assert_eq!(
            validate(&spec, &ParameterSet::new(), &path),
            Err(ValidationError::MissingCommand("terraform".into()))
        );
    }

    #[test]
    fn test_command_found_on_search_path() {
        let dir = TempDir::new().unwrap();
        let expected = make_executable(dir.path(), "terraform");
        let path = SearchPath::from_dirs([PathBuf::from("/nonexistent"), dir.path().to_path_buf()]);

        assert_eq!(path.find("terraform"), Some(expected));
    }

    #[test]
    fn test_non_executable_file_is_not_a_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes"), "text").unwrap();
        let path = SearchPath::from_dirs([dir.path()]);

        assert_eq!(path.find("notes"), None);
    }

    #[test]
    fn test_directory_is_not_a_command() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        let path = SearchPath::from_dirs([dir.path()]);

        assert_eq!(path.find("bin"), None);
    }

    #[test]
    fn test_command_with_slash_checked_directly() {
        let dir = TempDir::new().unwrap();
        let tool = make_executable(dir.path(), "tool");
        let path = SearchPath::default();

        assert_eq!(path.find(tool.to_str().unwrap()), Some(tool));
    }

    #[test]
    fn test_from_path_var_splits_entries() {
        let dir = TempDir::new().unwrap();
        make_executable(dir.path(), "kubectl");
        let var = format!("/nonexistent:{}", dir.path().display());

        assert!(SearchPath::from_path_var(var).find("kubectl").is_some());
    }
}
