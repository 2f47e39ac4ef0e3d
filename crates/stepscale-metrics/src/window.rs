//! Metrics window cache — bounded per-entity sample history.
//!
//! Each entity keeps its most recent `capacity` utilization values, oldest
//! first. Threshold votes require a full evaluation window: an unknown
//! entity or a short window never votes, so scaling cannot trigger on
//! missing data.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::source::UtilizationSample;

struct SampleWindow {
    values: VecDeque<u32>,
    /// Timestamp of the newest ingested sample, used to skip overlap.
    newest: Option<u64>,
    last_accessed: Instant,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            newest: None,
            last_accessed: Instant::now(),
        }
    }

    fn push(&mut self, value: u32, capacity: usize) {
        while self.values.len() >= capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }
}

/// Process-wide cache of recent utilization samples per entity.
///
/// Safe for concurrent use across entities. Writers to the same entity are
/// serialized by the owning reconciliation.
pub struct MetricsWindowCache {
    entries: DashMap<String, SampleWindow>,
    capacity: usize,
    ttl: Duration,
}

impl MetricsWindowCache {
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

    /// Append one sample, evicting the oldest at capacity.
    pub fn add(&self, key: &str, value: u32) {
        let mut window = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| SampleWindow::new(self.capacity));
        window.push(value, self.capacity);
        window.last_accessed = Instant::now();
    }

    /// Append the samples of a freshly fetched series that are newer than
    /// anything already held for `key`. Returns how many were appended.
    ///
    /// Consecutive queries overlap in time; this keeps a point from being
    /// counted twice. Touches the entry even when nothing is new.
    pub fn ingest(&self, key: &str, samples: &[UtilizationSample]) -> usize {
        let mut window = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| SampleWindow::new(self.capacity));

        let mut sorted: Vec<&UtilizationSample> = samples.iter().collect();
        sorted.sort_by_key(|s| s.timestamp);

        let mut appended = 0;
        for sample in sorted {
            if window.newest.is_some_and(|newest| sample.timestamp <= newest) {
                continue;
            }
            window.push(sample.value, self.capacity);
            window.newest = Some(sample.timestamp);
            appended += 1;
        }
        window.last_accessed = Instant::now();
        appended
    }

    /// Copy of the current window, oldest first. Empty for unknown keys.
    pub fn get(&self, key: &str) -> Vec<u32> {
        self.entries
            .get(key)
            .map(|w| w.values.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True if at least `min_samples` are held and every one is `>= threshold`.
    pub fn all_above(&self, key: &str, threshold: u32, min_samples: usize) -> bool {
        self.all_match(key, min_samples, |v| v >= threshold)
    }

    /// True if at least `min_samples` are held and every one is `<= threshold`.
    pub fn all_below(&self, key: &str, threshold: u32, min_samples: usize) -> bool {
        self.all_match(key, min_samples, |v| v <= threshold)
    }

    fn all_match(&self, key: &str, min_samples: usize, pred: impl Fn(u32) -> bool) -> bool {
        let Some(window) = self.entries.get(key) else {
            return false;
        };
        if window.values.is_empty() || window.values.len() < min_samples {
            return false;
        }
        window.values.iter().all(|&v| pred(v))
    }

    /// Remove entities idle for longer than the TTL. Returns how many.
    pub fn gc(&self) -> usize {
        self.gc_at(Instant::now())
    }

    fn gc_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, w| now.saturating_duration_since(w.last_accessed) <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "metrics window gc");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> MetricsWindowCache {
        MetricsWindowCache::new(capacity, Duration::from_secs(15 * 60))
    }

    fn samples(start: u64, values: &[u32]) -> Vec<UtilizationSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| UtilizationSample {
                timestamp: start + 60 * i as u64,
                value,
            })
            .collect()
    }

    #[test]
    fn add_keeps_most_recent_capacity_values() {
        let cache = cache(15);
        for i in 0..20 {
            cache.add("test", i);
        }
        let values = cache.get("test");
        assert_eq!(values, (5..20).collect::<Vec<u32>>());
    }

    #[test]
    fn get_unknown_key_is_empty() {
        assert!(cache(5).get("missing").is_empty());
    }

    #[test]
    fn short_window_never_votes() {
        let cache = cache(5);
        for v in [90, 95, 99, 100] {
            cache.add("web-1", v);
        }
        // 4 samples, window of 5 required: no vote regardless of values.
        assert!(!cache.all_above("web-1", 10, 5));
        assert!(!cache.all_below("web-1", 200, 5));
        assert!(!cache.all_above("missing", 0, 0));
    }

    #[test]
    fn thresholds_are_inclusive() {
        let cache = cache(5);
        for _ in 0..5 {
            cache.add("edge", 30);
        }
        assert!(cache.all_above("edge", 30, 5));
        assert!(cache.all_below("edge", 30, 5));
    }

    #[test]
    fn one_outlier_vetoes_the_vote() {
        let cache = cache(5);
        for v in [30, 30, 29, 30, 30] {
            cache.add("up", v);
        }
        for v in [20, 20, 21, 20, 20] {
            cache.add("down", v);
        }
        assert!(!cache.all_above("up", 30, 5));
        assert!(!cache.all_below("down", 20, 5));
    }

    #[test]
    fn ingest_skips_overlapping_points() {
        let cache = cache(10);
        assert_eq!(cache.ingest("web-1", &samples(0, &[1, 2, 3])), 3);
        // Next query window overlaps the last two points.
        assert_eq!(cache.ingest("web-1", &samples(60, &[2, 3, 4, 5])), 2);
        assert_eq!(cache.get("web-1"), vec![1, 2, 3, 4, 5]);
        // Same window again: nothing new.
        assert_eq!(cache.ingest("web-1", &samples(60, &[2, 3, 4, 5])), 0);
    }

    #[test]
    fn ingest_orders_unsorted_series() {
        let cache = cache(10);
        let mut series = samples(0, &[1, 2, 3]);
        series.reverse();
        cache.ingest("web-1", &series);
        assert_eq!(cache.get("web-1"), vec![1, 2, 3]);
    }

    #[test]
    fn ingest_of_empty_series_touches_entry() {
        let cache = cache(5);
        assert_eq!(cache.ingest("idle", &[]), 0);
        assert_eq!(cache.len(), 1);
        assert!(!cache.all_above("idle", 0, 0));
    }

    #[test]
    fn gc_removes_only_idle_entries() {
        let ttl = Duration::from_secs(60);
        let cache = MetricsWindowCache::new(5, ttl);
        cache.add("stale", 10);
        let later = Instant::now() + ttl + Duration::from_secs(1);

        // Nothing is old enough yet.
        assert_eq!(cache.gc(), 0);
        assert_eq!(cache.gc_at(later), 1);
        assert!(cache.get("stale").is_empty());

        cache.add("fresh", 10);
        assert_eq!(cache.gc(), 0);
        assert_eq!(cache.get("fresh"), vec![10]);
    }
}
