//! Parameter sets threaded through a deployment run.
//!
//! A `ParameterSet` belongs to exactly one scope (the environment or a single
//! target). It is passed by `&mut` through every invocation of that scope, so
//! values written by one action are visible to all later actions of the same
//! scope. There is no undo: later writes overwrite earlier ones.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]+$").unwrap());

/// Returns true if `name` matches the parameter name grammar `[A-Za-z_]+`.
pub fn is_valid_param_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Mutable name → value mapping for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, String>,
}

impl ParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by exact (case-sensitive) name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Presence check; an empty value still counts as present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set a value, returning the one it replaced
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    /// Apply pairs in order; a name repeated later wins
    pub fn apply<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.set(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Names that violate the `[A-Za-z_]+` grammar
    pub fn invalid_names(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|name| !is_valid_param_name(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        set.apply(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_name_grammar() {
        assert!(is_valid_param_name("region"));
        assert!(is_valid_param_name("RESOURCE_GROUP"));
        assert!(is_valid_param_name("_private"));
        assert!(!is_valid_param_name(""));
        assert!(!is_valid_param_name("node2"));
        assert!(!is_valid_param_name("with-dash"));
        assert!(!is_valid_param_name("a b"));
    }

    #[test]
    fn test_set_overwrites_and_returns_previous() {
        let mut params = ParameterSet::new();
        assert_eq!(params.set("TOKEN", "one"), None);
        assert_eq!(params.set("TOKEN", "two"), Some("one".to_string()));
        assert_eq!(params.get("TOKEN"), Some("two"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_empty_value_is_present() {
        let params: ParameterSet = [("region", "")].into_iter().collect();
        assert!(params.contains("region"));
        assert_eq!(params.get("region"), Some(""));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let params: ParameterSet = [("Region", "eu")].into_iter().collect();
        assert!(!params.contains("region"));
    }

    #[test]
    fn test_apply_last_write_wins() {
        let mut params = ParameterSet::new();
        params.apply([("A", "1"), ("B", "2"), ("A", "3")]);
        assert_eq!(params.get("A"), Some("3"));
        assert_eq!(params.get("B"), Some("2"));
    }

    #[test]
    fn test_invalid_names() {
        let params: ParameterSet = [("ok", "1"), ("not-ok", "2")].into_iter().collect();
        let invalid: Vec<_> = params.invalid_names().collect();
        assert_eq!(invalid, vec!["not-ok"]);
    }
}
