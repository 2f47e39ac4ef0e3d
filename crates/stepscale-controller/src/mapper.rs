//! Resolves a policy's `apiVersion`/`kind` into scalable resources.

use std::fmt;

use crate::error::{ControllerError, ControllerResult};

/// A `group/version` pair. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    /// Parse `group/version` or a bare `version`.
    pub fn parse(api_version: &str) -> ControllerResult<Self> {
        let invalid = || {
            ControllerError::Validation(format!("unexpected GroupVersion string: {api_version:?}"))
        };
        let mut parts = api_version.split('/');
        let (group, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), None, None) if !v.is_empty() => ("", v),
            (Some(g), Some(v), None) if !g.is_empty() && !v.is_empty() => (g, v),
            _ => return Err(invalid()),
        };
        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
        })
    }
}

/// One concrete resource a group/kind may be served as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceMapping {
    pub group: String,
    pub resource: String,
}

impl ResourceMapping {
    pub fn new(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Formats as `resource.group`, or just `resource` for the core group.
impl fmt::Display for ResourceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

pub trait ResourceMapper: Send + Sync {
    /// Candidate resources for a group/kind, preferred first.
    fn mappings(&self, group: &str, kind: &str) -> Vec<ResourceMapping>;
}

/// Fixed table of the usual scalable kinds, with a lowercase-plural
/// fallback for anything else.
pub struct StaticResourceMapper {
    table: Vec<(String, String, ResourceMapping)>,
}

impl StaticResourceMapper {
    pub fn new() -> Self {
        let mut mapper = Self { table: Vec::new() };
        for group in ["apps", "extensions"] {
            mapper = mapper
                .with_mapping(group, "Deployment", "deployments")
                .with_mapping(group, "ReplicaSet", "replicasets");
        }
        mapper
            .with_mapping("apps", "StatefulSet", "statefulsets")
            .with_mapping("", "ReplicationController", "replicationcontrollers")
    }

    /// Register an extra group/kind → resource entry.
    pub fn with_mapping(mut self, group: &str, kind: &str, resource: &str) -> Self {
        self.table.push((
            group.to_string(),
            kind.to_string(),
            ResourceMapping::new(group, resource),
        ));
        self
    }
}

impl Default for StaticResourceMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMapper for StaticResourceMapper {
    fn mappings(&self, group: &str, kind: &str) -> Vec<ResourceMapping> {
        if kind.is_empty() {
            return Vec::new();
        }
        let known: Vec<ResourceMapping> = self
            .table
            .iter()
            .filter(|(g, k, _)| g == group && k == kind)
            .map(|(_, _, m)| m.clone())
            .collect();
        if !known.is_empty() {
            return known;
        }
        vec![ResourceMapping::new(group, &pluralize(kind))]
    }
}

fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}
