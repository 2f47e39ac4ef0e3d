//! One reconciliation cycle for one policy key.
//!
//! ```text
//! key ─► policy ─► mappings ─► scale ─┬─ spec replicas 0 ─► disabled
//!                                     ├─ out of [min,max] ─► bound
//!                                     ├─ observed 0      ─► 1
//!                                     └─ calculator ─► cooldown gate ─► clamp
//!                                                  │
//!                  write (if changed) ◄────────────┘
//!                  history event, status condition
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use stepscale_autoscale::{ReplicaCalculator, ScaleDirection, ScalingHistoryCache};
use stepscale_core::{LabelSelector, PolicyKey};
use stepscale_state::{ScalingPolicy, TargetScale};

use crate::client::{PolicyStore, ScaleClient};
use crate::error::{ControllerError, ControllerResult};
use crate::mapper::{GroupVersion, ResourceMapper, ResourceMapping};

/// How a successful cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The policy no longer exists.
    Deleted,
    /// The target scale is gone.
    TargetMissing,
    /// The target's spec replicas are 0; autoscaling is off for it.
    Disabled,
    /// Desired replicas fell outside `[min, max]`; nothing was written.
    OutOfBounds { desired: u32 },
    /// The target already had the desired replica count.
    Unchanged { replicas: u32 },
    /// A new replica count was written.
    Scaled { from: u32, to: u32 },
}

pub struct Reconciler {
    policies: Arc<dyn PolicyStore>,
    scales: Arc<dyn ScaleClient>,
    mapper: Arc<dyn ResourceMapper>,
    calculator: ReplicaCalculator,
    history: Arc<ScalingHistoryCache>,
}

impl Reconciler {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        scales: Arc<dyn ScaleClient>,
        mapper: Arc<dyn ResourceMapper>,
        calculator: ReplicaCalculator,
        history: Arc<ScalingHistoryCache>,
    ) -> Self {
        Self {
            policies,
            scales,
            mapper,
            calculator,
            history,
        }
    }

    pub fn history(&self) -> &Arc<ScalingHistoryCache> {
        &self.history
    }

    pub fn calculator(&self) -> &ReplicaCalculator {
        &self.calculator
    }

    /// Drive the target of the policy named by `key` (`namespace/name`)
    /// toward its desired replica count.
    pub async fn reconcile(&self, key: &str) -> ControllerResult<Outcome> {
        let key: PolicyKey = key
            .parse()
            .map_err(|e: stepscale_core::KeyError| ControllerError::Validation(e.to_string()))?;

        let policy = match self.policies.get(&key.namespace, &key.name).await {
            Ok(Some(policy)) => policy,
            Ok(None) | Err(ControllerError::NotFound(_)) => {
                info!(policy = %key, "policy has been deleted");
                return Ok(Outcome::Deleted);
            }
            Err(e) => return Err(e),
        };
        self.validate(&policy)?;

        let spec = &policy.spec;
        let gv = GroupVersion::parse(&spec.target.api_version)?;
        let mappings = self.mapper.mappings(&gv.group, &spec.target.kind);
        debug!(policy = %key, ?mappings, "resolved target mappings");

        let (scale, mapping) = match self
            .scale_for_mappings(&policy.namespace, &spec.target, &mappings)
            .await
        {
            Ok(found) => found,
            Err(ControllerError::NotFound(what)) => {
                info!(policy = %key, %what, "target not found, skipping");
                return Ok(Outcome::TargetMissing);
            }
            Err(e) => return Err(e),
        };
        let target = scale.table_key();
        let current = scale.status_replicas;

        let desired = if scale.spec_replicas == 0 {
            info!(policy = %key, %target, "autoscaling disabled by target");
            return Ok(Outcome::Disabled);
        } else if current > spec.max_replicas {
            spec.max_replicas
        } else if current < spec.min_replicas {
            spec.min_replicas
        } else if current == 0 {
            1
        } else {
            self.compute(&policy, &scale, &target).await?
        };
        debug!(policy = %key, current, desired, "computed desired replicas");

        if desired < spec.min_replicas || desired > spec.max_replicas {
            info!(
                policy = %key,
                desired,
                min = spec.min_replicas,
                max = spec.max_replicas,
                "desired replicas outside bounds, not rescaling"
            );
            return Ok(Outcome::OutOfBounds { desired });
        }

        let outcome = if desired == scale.spec_replicas {
            Outcome::Unchanged { replicas: desired }
        } else {
            self.scales
                .update_scale(&mapping, &scale.namespace, &scale.name, desired)
                .await?;
            info!(policy = %key, %target, from = scale.spec_replicas, to = desired, "rescaled target");
            Outcome::Scaled {
                from: scale.spec_replicas,
                to: desired,
            }
        };

        self.history.add_event(&target, current, desired);
        self.write_status(&key, &policy, desired).await;
        Ok(outcome)
    }

    fn validate(&self, policy: &ScalingPolicy) -> ControllerResult<()> {
        let spec = &policy.spec;
        if spec.min_replicas > spec.max_replicas {
            return Err(ControllerError::Validation(format!(
                "minReplicas {} is greater than maxReplicas {}",
                spec.min_replicas, spec.max_replicas
            )));
        }
        if spec.evaluations == 0 {
            return Err(ControllerError::Validation(
                "evaluations must be at least 1".to_string(),
            ));
        }
        let capacity = self.calculator.window().capacity();
        if spec.evaluations as usize > capacity {
            return Err(ControllerError::Configuration(format!(
                "evaluations {} exceeds metrics window capacity {capacity}",
                spec.evaluations
            )));
        }
        let history = self.history.capacity();
        if spec.cooldown_cycles as usize > history {
            return Err(ControllerError::Configuration(format!(
                "cooldownCycles {} exceeds scaling history capacity {history}",
                spec.cooldown_cycles
            )));
        }
        Ok(())
    }

    /// The first mapping the target is served under. With no success, the
    /// first mapping's error.
    async fn scale_for_mappings(
        &self,
        namespace: &str,
        target: &stepscale_state::ScaleTarget,
        mappings: &[ResourceMapping],
    ) -> ControllerResult<(TargetScale, ResourceMapping)> {
        let mut first_err = None;
        for mapping in mappings {
            match self.scales.get_scale(mapping, namespace, &target.name).await {
                Ok(scale) => return Ok((scale, mapping.clone())),
                Err(e) => {
                    debug!(%mapping, name = %target.name, error = %e, "scale lookup failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or_else(|| {
            ControllerError::Validation(format!(
                "unrecognized resource {}/{}",
                target.api_version, target.kind
            ))
        }))
    }

    /// Desired replicas from metrics, gated by cooldown and clamped.
    ///
    /// A held or blocked proposal keeps the count last written to the
    /// target, so a rollout that has not converged yet is not undone.
    async fn compute(
        &self,
        policy: &ScalingPolicy,
        scale: &TargetScale,
        target: &str,
    ) -> ControllerResult<u32> {
        let spec = &policy.spec;
        let selector = selector_for(policy, scale)?;
        let proposal = self
            .calculator
            .propose(policy, &selector, scale.status_replicas)
            .await?;

        let allowed = match proposal.direction {
            ScaleDirection::Up => self.history.can_scale_up(target, spec.cooldown_cycles)?,
            ScaleDirection::Down => self.history.can_scale_down(target, spec.cooldown_cycles)?,
            ScaleDirection::Hold => false,
        };
        if proposal.direction != ScaleDirection::Hold && !allowed {
            info!(
                policy = %policy.key(),
                %target,
                direction = ?proposal.direction,
                cooldown = spec.cooldown_cycles,
                "rescale blocked by cooldown"
            );
        }

        let desired = if allowed {
            proposal.replicas
        } else {
            scale.spec_replicas
        };
        Ok(desired.clamp(spec.min_replicas, spec.max_replicas))
    }

    async fn write_status(&self, key: &PolicyKey, policy: &ScalingPolicy, desired: u32) {
        let condition = format!("Scaled to {desired} replicas");
        if policy.status.condition == condition {
            return;
        }
        let mut updated = policy.clone();
        updated.status.condition = condition;
        if let Err(e) = self.policies.update_status(&updated).await {
            warn!(policy = %key, error = %e, "failed to update policy status");
        }
    }
}

/// The policy's label override, else the target's own selector.
fn selector_for(policy: &ScalingPolicy, scale: &TargetScale) -> ControllerResult<LabelSelector> {
    let raw = policy
        .spec
        .label
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&scale.selector);
    if raw.trim().is_empty() {
        return Err(ControllerError::Validation(format!(
            "selector required for target {}",
            scale.table_key()
        )));
    }
    raw.parse()
        .map_err(|e: stepscale_core::SelectorError| ControllerError::Validation(e.to_string()))
}
