//! Rate-limited work queue.
//!
//! A key is queued at most once. A key added while a worker holds it is
//! marked dirty and handed out again after `done`, so every change is seen
//! by at least one later pass and no key is processed by two workers at
//! once.
//!
//! ```text
//! add ──► dirty ──► queue ──► get ──► processing ──► done
//!                     ▲                    │
//!                     └── (dirty again) ───┘
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create a queue whose per-key retry delay doubles from `backoff_base`
    /// up to `backoff_max`.
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff_base,
            backoff_max,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a key as needing processing. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Re-queued by `done`.
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add a key after its next backoff delay. Each call without an
    /// intervening `forget` doubles the delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let failures = {
            let mut state = self.lock();
            let n = state.failures.entry(key.clone()).or_insert(0);
            *n = n.saturating_add(1);
            *n
        };
        let delay = self.backoff_for(failures);
        trace!(?key, failures, ?delay, "rate limited requeue");
        self.add_after(key, delay);
        delay
    }

    fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }

    /// Clear a key's failure count.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Consecutive rate-limited requeues of a key.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by `get`, re-queueing it if it was added
    /// in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker. Keys still
    /// queued are abandoned.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ))
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = queue();
        q.add("default/web".to_string());
        q.add("default/web".to_string());
        q.add("default/api".to_string());
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await.as_deref(), Some("default/web"));
        assert_eq!(q.get().await.as_deref(), Some("default/api"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_is_handed_out_after_done() {
        let q = queue();
        q.add("default/web".to_string());
        let key = q.get().await.unwrap();

        q.add(key.clone());
        // Not handed out a second time while in flight.
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key));
    }

    #[tokio::test]
    async fn done_without_new_add_does_not_requeue() {
        let q = queue();
        q.add("default/web".to_string());
        let key = q.get().await.unwrap();
        q.done(&key);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn shut_down_wakes_waiters_and_drops_new_adds() {
        let q = queue();
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        q.add("default/web".to_string());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn queued_keys_are_abandoned_on_shut_down() {
        let q = queue();
        q.add("default/web".to_string());
        q.shut_down();
        assert_eq!(q.get().await, None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let q: WorkQueue<String> =
            WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1));
        assert_eq!(q.backoff_for(1), Duration::from_millis(5));
        assert_eq!(q.backoff_for(2), Duration::from_millis(10));
        assert_eq!(q.backoff_for(4), Duration::from_millis(40));
        assert_eq!(q.backoff_for(20), Duration::from_secs(1));
        assert_eq!(q.backoff_for(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_key_reappears_after_backoff() {
        let q = queue();
        let key = "default/web".to_string();

        assert_eq!(q.add_rate_limited(key.clone()), Duration::from_millis(5));
        assert_eq!(q.add_rate_limited(key.clone()), Duration::from_millis(10));
        assert_eq!(q.num_requeues(&key), 2);
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key.clone()));

        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
        assert_eq!(q.add_rate_limited(key.clone()), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_add_after_shut_down_is_dropped() {
        let q = queue();
        q.add_after("default/web".to_string(), Duration::from_secs(1));
        q.shut_down();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(q.is_empty());
    }
}
