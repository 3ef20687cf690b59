//! Equality-based label selectors
//!
//! Rendered in the Kubernetes `labelSelector` query syntax (`a=b,c,!d`) for the API server and
//! evaluated locally to re-check candidates against a possibly stale list.

use std::collections::BTreeMap;
use std::fmt;

/// A single selector requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// `key=value`
    Equals(String, String),
    /// `key`
    Exists(String),
    /// `!key`
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let get = |key: &str| labels.and_then(|l| l.get(key));
        match self {
            Requirement::Equals(key, value) => get(key).is_some_and(|v| v == value),
            Requirement::Exists(key) => get(key).is_some(),
            Requirement::DoesNotExist(key) => get(key).is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{key}={value}"),
            Requirement::Exists(key) => write!(f, "{key}"),
            Requirement::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of requirements; an empty selector matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Empty selector
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key=value`
    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Equals(key.into(), value.into()));
        self
    }

    /// Require `key` to be present
    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    /// Require `key` to be absent
    #[must_use]
    pub fn does_not_exist(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::DoesNotExist(key.into()));
        self
    }

    /// Requirements in insertion order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True when no requirement is set
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluate the selector against an object's labels
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for requirement in &self.requirements {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_renders_query_syntax() {
        let selector = LabelSelector::new()
            .equals("size-m5.metal", "true")
            .exists("dcops.microscaler.io/pool")
            .does_not_exist("dcops.microscaler.io/leased");
        assert_eq!(
            selector.to_string(),
            "size-m5.metal=true,dcops.microscaler.io/pool,!dcops.microscaler.io/leased"
        );
    }

    #[test]
    fn test_matches_all_requirements() {
        let selector = LabelSelector::new()
            .equals("size-m5.metal", "true")
            .does_not_exist("leased");

        assert!(selector.matches(Some(&labels(&[("size-m5.metal", "true")]))));
        assert!(!selector.matches(Some(&labels(&[("size-m5.metal", "false")]))));
        assert!(!selector.matches(Some(&labels(&[("size-m5.metal", "true"), ("leased", "true")]))));
        assert!(!selector.matches(None));
    }

    #[test]
    fn test_empty_selector_matches_anything() {
        let selector = LabelSelector::new();
        assert!(selector.is_empty());
        assert!(selector.matches(None));
        assert_eq!(selector.to_string(), "");
    }
}
