//! Shared types used across stepscale crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A work-queue key failed to split into `{namespace}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected key format: {0:?}")]
pub struct KeyError(pub String);

/// Identity of a scaling policy: `{namespace}/{name}`.
///
/// A key without a slash belongs to the empty (cluster-wide) namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyKey {
    pub namespace: String,
    pub name: String,
}

impl PolicyKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for PolicyKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", *name)),
            [namespace, name] if !name.is_empty() => Ok(Self::new(*namespace, *name)),
            _ => Err(KeyError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_namespaced_key() {
        let key: PolicyKey = "default/web".parse().unwrap();
        assert_eq!(key, PolicyKey::new("default", "web"));
        assert_eq!(key.to_string(), "default/web");
    }

    #[test]
    fn parse_cluster_scoped_key() {
        let key: PolicyKey = "web".parse().unwrap();
        assert_eq!(key.namespace, "");
        assert_eq!(key.to_string(), "web");
    }

    #[test]
    fn reject_malformed_keys() {
        assert!("a/b/c".parse::<PolicyKey>().is_err());
        assert!("".parse::<PolicyKey>().is_err());
        assert!("default/".parse::<PolicyKey>().is_err());
    }
}
