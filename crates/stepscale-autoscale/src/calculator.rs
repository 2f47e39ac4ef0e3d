//! Replica calculator — threshold votes over per-entity sample windows.
//!
//! Enumerates the target's entities, fetches their recent utilization in
//! one batched query, folds the result into the shared window cache, and
//! aggregates per-entity votes into a proposal. Cooldown is not applied
//! here; see `ScalingHistoryCache`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use stepscale_core::LabelSelector;
use stepscale_metrics::{MetricsError, MetricsSource, MetricsWindowCache};
use stepscale_state::{ScalingPolicy, StateStore};

/// Enumerates the member entities of a target.
#[async_trait]
pub trait EntityLister: Send + Sync {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> anyhow::Result<Vec<String>>;
}

/// Entities registered in the embedded store, filtered by label.
#[async_trait]
impl EntityLister for StateStore {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> anyhow::Result<Vec<String>> {
        let entities = self.list_entities(namespace)?;
        Ok(entities
            .into_iter()
            .filter(|e| selector.matches(&e.labels))
            .map(|e| e.name)
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("failed to list entities: {0}")]
    List(#[from] anyhow::Error),

    #[error("failed to fetch metrics: {0}")]
    Metrics(#[from] MetricsError),
}

/// Direction of a proposed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
    Hold,
}

/// Aggregated per-entity votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Votes {
    pub scale_up: bool,
    pub scale_down: bool,
    /// Entities that had a full evaluation window.
    pub qualified: usize,
}

/// A replica count proposed by the calculator, before clamping and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub replicas: u32,
    pub direction: ScaleDirection,
    pub votes: Votes,
}

pub struct ReplicaCalculator {
    source: Arc<dyn MetricsSource>,
    lister: Arc<dyn EntityLister>,
    window: Arc<MetricsWindowCache>,
}

impl ReplicaCalculator {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        lister: Arc<dyn EntityLister>,
        window: Arc<MetricsWindowCache>,
    ) -> Self {
        Self {
            source,
            lister,
            window,
        }
    }

    /// The window cache samples are folded into.
    pub fn window(&self) -> &Arc<MetricsWindowCache> {
        &self.window
    }

    /// Propose a replica count for a policy's target.
    pub async fn propose(
        &self,
        policy: &ScalingPolicy,
        selector: &LabelSelector,
        current_replicas: u32,
    ) -> Result<Proposal, CalculatorError> {
        let namespace = policy.namespace.as_str();
        let entities = self.lister.list(namespace, selector).await?;
        let series = self
            .source
            .query(namespace, &entities, policy.spec.evaluations)
            .await?;

        for entity in &entities {
            let samples = series.get(entity).map(Vec::as_slice).unwrap_or_default();
            self.window.ingest(&window_key(namespace, entity), samples);
        }

        let votes = self.votes(namespace, &entities, policy);
        let proposal = propose_from_votes(current_replicas, votes, policy);
        debug!(
            policy = %policy.key(),
            entities = entities.len(),
            with_metrics = series.len(),
            qualified = votes.qualified,
            scale_up = votes.scale_up,
            scale_down = votes.scale_down,
            "entity votes"
        );
        match proposal.direction {
            ScaleDirection::Up => info!(
                policy = %policy.key(),
                from = current_replicas,
                to = proposal.replicas,
                "proposing scale up"
            ),
            ScaleDirection::Down => info!(
                policy = %policy.key(),
                from = current_replicas,
                to = proposal.replicas,
                "proposing scale down"
            ),
            ScaleDirection::Hold => debug!(policy = %policy.key(), "no scaling activity"),
        }
        Ok(proposal)
    }

    /// OR the up and down votes of every entity with a full window.
    pub fn votes(&self, namespace: &str, entities: &[String], policy: &ScalingPolicy) -> Votes {
        let spec = &policy.spec;
        let min_samples = spec.evaluations as usize;
        let mut votes = Votes::default();

        for entity in entities {
            let key = window_key(namespace, entity);
            if self.window.get(&key).len() < min_samples.max(1) {
                continue;
            }
            votes.qualified += 1;
            votes.scale_up |= self
                .window
                .all_above(&key, spec.scale_up_threshold, min_samples);
            votes.scale_down |= self
                .window
                .all_below(&key, spec.scale_down_threshold, min_samples);
        }

        if votes.scale_up && votes.scale_down {
            votes.scale_down = false;
        }
        votes
    }
}

/// Apply the policy's step sizes to the aggregated votes.
pub fn propose_from_votes(current: u32, votes: Votes, policy: &ScalingPolicy) -> Proposal {
    let (replicas, direction) = if votes.scale_up {
        (
            current.saturating_add(policy.spec.scale_up_size),
            ScaleDirection::Up,
        )
    } else if votes.scale_down {
        (
            current.saturating_sub(policy.spec.scale_down_size),
            ScaleDirection::Down,
        )
    } else {
        (current, ScaleDirection::Hold)
    };
    Proposal {
        replicas,
        direction,
        votes,
    }
}

/// Window cache key of an entity. Entity names are only unique per namespace.
pub fn window_key(namespace: &str, entity: &str) -> String {
    format!("{namespace}/{entity}")
}
