//! Domain types for the stepscale state store.
//!
//! These mirror the resources the controller works against: the scaling
//! policy it reads (and whose status it writes), the scale subresource of
//! the target workload, and the member entities enumerated by selector.
//! All types serialize to/from JSON in camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stepscale_core::PolicyKey;

// ── Policy ────────────────────────────────────────────────────────

/// Declarative scaling policy for exactly one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    pub namespace: String,
    pub name: String,
    pub spec: PolicySpec,
    #[serde(default)]
    pub status: PolicyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub target: ScaleTarget,
    /// Label selector override. When unset the target's own selector is used.
    #[serde(default)]
    pub label: Option<String>,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Utilization percentage every sample must reach to vote for scale-up.
    pub scale_up_threshold: u32,
    /// Utilization percentage every sample must stay under to vote for scale-down.
    pub scale_down_threshold: u32,
    /// Samples (one per minute) required before an entity may vote.
    pub evaluations: u32,
    pub scale_up_size: u32,
    pub scale_down_size: u32,
    /// Cycles that must pass without a same-direction rescale.
    #[serde(default = "default_cooldown_cycles")]
    pub cooldown_cycles: u32,
}

fn default_cooldown_cycles() -> u32 {
    3
}

/// Reference to the workload whose replica count is managed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTarget {
    /// `group/version`, or just `version` for the core group.
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    /// Human-readable outcome of the last applied rescale.
    pub condition: String,
}

// ── Target scale ──────────────────────────────────────────────────

/// Scale subresource of a target workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetScale {
    /// Resolved resource, e.g. `deployments.apps`.
    pub resource: String,
    pub namespace: String,
    pub name: String,
    /// Desired replicas as last written to the target's spec.
    pub spec_replicas: u32,
    /// Replicas observed running.
    pub status_replicas: u32,
    /// Label selector enumerating the target's member entities.
    #[serde(default)]
    pub selector: String,
}

// ── Entity ────────────────────────────────────────────────────────

/// A member of a target (a pod, in the reference deployment).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ScalingPolicy {
    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(&self.namespace, &self.name)
    }

    /// Build the composite key for the policies table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl TargetScale {
    /// Build the composite key for the targets table.
    pub fn table_key(&self) -> String {
        target_key(&self.resource, &self.namespace, &self.name)
    }
}

impl Entity {
    /// Build the composite key for the entities table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

pub(crate) fn target_key(resource: &str, namespace: &str, name: &str) -> String {
    format!("{resource}/{namespace}/{name}")
}
