//! Backend traits the reconciler drives, and their embedded-store
//! implementations.
//!
//! The `EntityLister` lives with the calculator in `stepscale-autoscale`
//! and is re-exported here.

use async_trait::async_trait;

use stepscale_state::{PolicyStatus, ScalingPolicy, StateStore, TargetScale};

use crate::error::{ControllerError, ControllerResult};
use crate::mapper::ResourceMapping;

pub use stepscale_autoscale::EntityLister;

/// Read access to scaling policies plus status writes.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> ControllerResult<Option<ScalingPolicy>>;

    async fn list(&self) -> ControllerResult<Vec<ScalingPolicy>>;

    /// Persist `policy.status`. The spec is left untouched.
    async fn update_status(&self, policy: &ScalingPolicy) -> ControllerResult<()>;
}

/// The scale subresource of target workloads.
#[async_trait]
pub trait ScaleClient: Send + Sync {
    /// Fails with `NotFound` when the target is not served as `mapping`.
    async fn get_scale(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> ControllerResult<TargetScale>;

    async fn update_scale(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> ControllerResult<()>;
}

#[async_trait]
impl PolicyStore for StateStore {
    async fn get(&self, namespace: &str, name: &str) -> ControllerResult<Option<ScalingPolicy>> {
        Ok(self.get_policy(namespace, name)?)
    }

    async fn list(&self) -> ControllerResult<Vec<ScalingPolicy>> {
        Ok(self.list_policies()?)
    }

    async fn update_status(&self, policy: &ScalingPolicy) -> ControllerResult<()> {
        let status = PolicyStatus {
            condition: policy.status.condition.clone(),
        };
        Ok(self.update_policy_status(&policy.namespace, &policy.name, &status)?)
    }
}

#[async_trait]
impl ScaleClient for StateStore {
    async fn get_scale(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> ControllerResult<TargetScale> {
        let resource = mapping.to_string();
        self.get_target(&resource, namespace, name)?
            .ok_or_else(|| ControllerError::NotFound(format!("{resource} {namespace}/{name}")))
    }

    async fn update_scale(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> ControllerResult<()> {
        Ok(self.set_target_replicas(&mapping.to_string(), namespace, name, replicas)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepscale_state::{PolicySpec, ScaleTarget};

    fn target() -> TargetScale {
        TargetScale {
            resource: "deployments.apps".to_string(),
            namespace: "default".to_string(),
            name: "web".to_string(),
            spec_replicas: 2,
            status_replicas: 2,
            selector: "app=web".to_string(),
        }
    }

    #[tokio::test]
    async fn scale_lookup_is_keyed_by_mapping() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_target(&target()).unwrap();

        let apps = ResourceMapping::new("apps", "deployments");
        let ext = ResourceMapping::new("extensions", "deployments");

        let scale = store.get_scale(&apps, "default", "web").await.unwrap();
        assert_eq!(scale.spec_replicas, 2);
        assert!(matches!(
            store.get_scale(&ext, "default", "web").await,
            Err(ControllerError::NotFound(_))
        ));

        store.update_scale(&apps, "default", "web", 4).await.unwrap();
        let scale = store.get_scale(&apps, "default", "web").await.unwrap();
        assert_eq!(scale.spec_replicas, 4);

        assert!(matches!(
            store.update_scale(&ext, "default", "web", 4).await,
            Err(ControllerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_update_leaves_spec_alone() {
        let store = StateStore::open_in_memory().unwrap();
        let mut policy = ScalingPolicy {
            namespace: "default".to_string(),
            name: "web".to_string(),
            spec: PolicySpec {
                target: ScaleTarget {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: "web".to_string(),
                },
                label: None,
                min_replicas: 1,
                max_replicas: 5,
                scale_up_threshold: 70,
                scale_down_threshold: 20,
                evaluations: 3,
                scale_up_size: 1,
                scale_down_size: 1,
                cooldown_cycles: 3,
            },
            status: PolicyStatus::default(),
        };
        store.put_policy(&policy).unwrap();

        policy.spec.max_replicas = 99;
        policy.status.condition = "Scaled to 3 replicas".to_string();
        PolicyStore::update_status(&store, &policy).await.unwrap();

        let stored = PolicyStore::get(&store, "default", "web").await.unwrap().unwrap();
        assert_eq!(stored.status.condition, "Scaled to 3 replicas");
        assert_eq!(stored.spec.max_replicas, 5);
        assert_eq!(PolicyStore::list(&store).await.unwrap().len(), 1);
    }
}
