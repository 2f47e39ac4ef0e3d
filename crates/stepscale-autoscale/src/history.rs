//! Scaling history — bounded per-target record of past rescales.
//!
//! Every reconciliation that reaches the write step appends one event,
//! including no-op cycles, so cooldowns are measured in cycles.

use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// One applied transition of a target's replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingEvent {
    pub previous_replicas: u32,
    pub new_replicas: u32,
    /// Unix timestamp (seconds) when the event was recorded.
    pub timestamp: u64,
}

impl ScalingEvent {
    pub fn is_scale_up(&self) -> bool {
        self.new_replicas > self.previous_replicas
    }

    pub fn is_scale_down(&self) -> bool {
        self.new_replicas < self.previous_replicas
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The cooldown cannot be verified over more cycles than are retained.
    #[error("cooldown {cooldown} is longer than history {capacity}")]
    CooldownExceedsHistory { cooldown: usize, capacity: usize },
}

struct History {
    events: VecDeque<ScalingEvent>,
    last_accessed: Instant,
}

/// Process-wide scaling history keyed by target identity.
pub struct ScalingHistoryCache {
    entries: DashMap<String, History>,
    capacity: usize,
    ttl: Duration,
}

impl ScalingHistoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a transition, evicting the oldest event at capacity.
    pub fn add_event(&self, target: &str, previous_replicas: u32, new_replicas: u32) {
        let mut history = self
            .entries
            .entry(target.to_string())
            .or_insert_with(|| History {
                events: VecDeque::with_capacity(self.capacity),
                last_accessed: Instant::now(),
            });
        while history.events.len() >= self.capacity {
            history.events.pop_front();
        }
        history.events.push_back(ScalingEvent {
            previous_replicas,
            new_replicas,
            timestamp: epoch_secs(),
        });
        history.last_accessed = Instant::now();
    }

    /// Copy of a target's events, oldest first.
    pub fn events(&self, target: &str) -> Vec<ScalingEvent> {
        self.entries
            .get(target)
            .map(|h| h.events.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether none of the last `cooldown` cycles scaled the target up.
    ///
    /// Refuses while fewer than `cooldown` cycles are on record.
    pub fn can_scale_up(&self, target: &str, cooldown: u32) -> Result<bool, HistoryError> {
        self.can_scale(target, cooldown, ScalingEvent::is_scale_up)
    }

    /// Whether none of the last `cooldown` cycles scaled the target down.
    pub fn can_scale_down(&self, target: &str, cooldown: u32) -> Result<bool, HistoryError> {
        self.can_scale(target, cooldown, ScalingEvent::is_scale_down)
    }

    fn can_scale(
        &self,
        target: &str,
        cooldown: u32,
        blocks: fn(&ScalingEvent) -> bool,
    ) -> Result<bool, HistoryError> {
        let cooldown = cooldown as usize;
        if cooldown > self.capacity {
            return Err(HistoryError::CooldownExceedsHistory {
                cooldown,
                capacity: self.capacity,
            });
        }
        if cooldown == 0 {
            return Ok(true);
        }
        let Some(history) = self.entries.get(target) else {
            return Ok(false);
        };
        if history.events.len() < cooldown {
            return Ok(false);
        }
        Ok(!history.events.iter().rev().take(cooldown).any(blocks))
    }

    /// Remove targets idle for longer than the TTL. Returns how many.
    pub fn gc(&self) -> usize {
        self.gc_at(Instant::now())
    }

    fn gc_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, h| now.saturating_duration_since(h.last_accessed) <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "scaling history gc");
        }
        removed
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
