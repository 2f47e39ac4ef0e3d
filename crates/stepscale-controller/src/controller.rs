//! Controller — workers, change notifications, resync, and cache GC.
//!
//! The `Controller` owns the work queue and a fixed pool of workers. Its
//! run loop feeds the queue from three sources:
//! - policy change notifications from the store
//! - a periodic full resync of every policy
//! - (indirectly) rate-limited requeues of keys that failed transiently
//!
//! It also garbage collects the metrics window and scaling history caches
//! on their own interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use stepscale_core::{ConfigError, ControllerConfig, PolicyKey};

use crate::client::PolicyStore;
use crate::error::ControllerResult;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::stats::ControllerStats;

/// Runtime knobs of the run loop.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workers: usize,
    pub resync_interval: Duration,
    pub gc_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            workers: config.workers,
            resync_interval: config.resync_interval()?,
            gc_interval: config.gc_interval()?,
        })
    }
}

pub struct Controller {
    reconciler: Reconciler,
    policies: Arc<dyn PolicyStore>,
    queue: Arc<WorkQueue<String>>,
    stats: Arc<ControllerStats>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        policies: Arc<dyn PolicyStore>,
        queue: Arc<WorkQueue<String>>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            reconciler,
            policies,
            queue,
            stats: Arc::new(ControllerStats::new()),
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<ControllerStats> {
        &self.stats
    }

    pub fn enqueue(&self, key: &PolicyKey) {
        self.queue.add(key.to_string());
    }

    /// Enqueue every stored policy. Returns how many.
    pub async fn resync(&self) -> ControllerResult<usize> {
        let policies = self.policies.list().await?;
        for policy in &policies {
            self.enqueue(&policy.key());
        }
        debug!(policies = policies.len(), "resync");
        Ok(policies.len())
    }

    /// Drop idle entries from both caches.
    pub fn gc(&self) {
        let windows = self.reconciler.calculator().window().gc();
        let histories = self.reconciler.history().gc();
        debug!(windows, histories, "cache gc");
    }

    /// Take one key off the queue and reconcile it. Returns false once the
    /// queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.reconciler.reconcile(&key).await {
            Ok(outcome) => {
                debug!(policy = %key, ?outcome, "reconciled");
                self.stats.record_success(&outcome);
                self.queue.forget(&key);
            }
            Err(e) if e.is_retryable() => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(
                    policy = %key,
                    error = %e,
                    retries = self.queue.num_requeues(&key),
                    ?delay,
                    "reconcile failed, requeueing"
                );
                self.stats.record_failure(true);
            }
            Err(e) => {
                error!(policy = %key, kind = e.kind(), error = %e, "reconcile failed");
                self.stats.record_failure(false);
                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
        true
    }

    /// Run until `shutdown` flips (or its sender is dropped).
    ///
    /// Workers finish the key they hold, then exit; queued keys are
    /// abandoned.
    pub async fn run(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<PolicyKey>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let workers = self.settings.workers.max(1);
        info!(
            workers,
            resync = ?self.settings.resync_interval,
            gc = ?self.settings.gc_interval,
            "controller started"
        );

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                while this.process_next().await {}
                debug!(worker, "worker stopped");
            }));
        }

        let mut resync = tokio::time::interval(self.settings.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut gc = tokio::time::interval(self.settings.gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first resync tick fires immediately; the first GC would find nothing.
        gc.tick().await;

        let mut notifications_open = true;
        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = changes.recv(), if notifications_open => match msg {
                    Ok(key) => self.enqueue(&key),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "policy notifications lagged, resyncing");
                        self.resync_logged().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("policy notifications closed, relying on resync");
                        notifications_open = false;
                    }
                },
                _ = resync.tick() => self.resync_logged().await,
                _ = gc.tick() => self.gc(),
            }
        }

        info!("controller shutting down");
        self.queue.shut_down();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker panicked");
            }
        }
        info!("controller stopped");
    }

    async fn resync_logged(&self) {
        if let Err(e) = self.resync().await {
            warn!(error = %e, "resync failed");
        }
    }
}
