//! Metrics source abstraction and an in-memory fake.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};

/// One utilization point for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationSample {
    /// Unix timestamp (seconds) of the point.
    pub timestamp: u64,
    /// Usage as a percentage of the requested resource. May exceed 100.
    pub value: u32,
}

/// Per-entity series keyed by entity name, oldest sample first.
pub type EntitySeries = HashMap<String, Vec<UtilizationSample>>;

/// A backend that returns recent utilization series for a set of entities.
///
/// Implementations answer one batched query per call. Entities the backend
/// knows nothing about are simply absent from the result.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch up to `window` one-minute samples per entity, ending now.
    async fn query(
        &self,
        namespace: &str,
        entities: &[String],
        window: u32,
    ) -> MetricsResult<EntitySeries>;
}

/// Deterministic metrics source for tests and for running without a backend.
///
/// Returns the last `window` configured samples of each requested entity.
#[derive(Default)]
pub struct StaticMetricsSource {
    series: Mutex<HashMap<(String, String), Vec<UtilizationSample>>>,
    fail_with: Mutex<Option<String>>,
    queries: AtomicUsize,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an entity's series. Values get one-minute-spaced timestamps
    /// starting at `start`.
    pub fn set_values(&self, namespace: &str, entity: &str, start: u64, values: &[u32]) {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &value)| UtilizationSample {
                timestamp: start + 60 * i as u64,
                value,
            })
            .collect();
        self.set_series(namespace, entity, samples);
    }

    pub fn set_series(&self, namespace: &str, entity: &str, samples: Vec<UtilizationSample>) {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series.insert((namespace.to_string(), entity.to_string()), samples);
    }

    /// Make every subsequent query fail (`Some`) or succeed again (`None`).
    pub fn fail_with(&self, message: Option<&str>) {
        let mut fail = self.fail_with.lock().unwrap_or_else(|e| e.into_inner());
        *fail = message.map(str::to_string);
    }

    /// Number of queries answered or failed so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn query(
        &self,
        namespace: &str,
        entities: &[String],
        window: u32,
    ) -> MetricsResult<EntitySeries> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        if let Some(message) = self
            .fail_with
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(MetricsError::Request(message));
        }

        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        let mut result = EntitySeries::new();
        for entity in entities {
            if let Some(samples) = series.get(&(namespace.to_string(), entity.clone())) {
                let skip = samples.len().saturating_sub(window as usize);
                result.insert(entity.clone(), samples[skip..].to_vec());
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_requested_entities_only() {
        let source = StaticMetricsSource::new();
        source.set_values("default", "web-1", 0, &[10, 20, 30]);
        source.set_values("default", "web-2", 0, &[40]);
        source.set_values("other", "web-1", 0, &[99]);

        let result = source
            .query("default", &["web-1".to_string(), "ghost".to_string()], 5)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        let values: Vec<u32> = result["web-1"].iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn static_source_truncates_to_window() {
        let source = StaticMetricsSource::new();
        source.set_values("default", "web-1", 1000, &[1, 2, 3, 4, 5]);

        let result = source
            .query("default", &["web-1".to_string()], 2)
            .await
            .unwrap();

        assert_eq!(
            result["web-1"],
            vec![
                UtilizationSample { timestamp: 1180, value: 4 },
                UtilizationSample { timestamp: 1240, value: 5 },
            ]
        );
    }

    #[tokio::test]
    async fn static_source_injected_failure() {
        let source = StaticMetricsSource::new();
        source.fail_with(Some("backend down"));

        let err = source.query("default", &[], 5).await.unwrap_err();
        assert!(matches!(err, MetricsError::Request(_)));
        assert_eq!(source.query_count(), 1);

        source.fail_with(None);
        assert!(source.query("default", &[], 5).await.is_ok());
    }
}
