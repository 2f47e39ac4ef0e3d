//! Controller counters and their Prometheus text rendering.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::reconciler::Outcome;

/// Lock-free counters updated by the workers.
#[derive(Debug, Default)]
pub struct ControllerStats {
    reconciles: AtomicU64,
    failures: AtomicU64,
    requeues: AtomicU64,
    rescales: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub reconciles: u64,
    pub failures: u64,
    pub requeues: u64,
    pub rescales: u64,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, outcome: &Outcome) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
        if matches!(outcome, Outcome::Scaled { .. }) {
            self.rescales.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, requeued: bool) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        if requeued {
            self.requeues.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reconciles: self.reconciles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            rescales: self.rescales.load(Ordering::Relaxed),
        }
    }
}

/// Render counters plus the current queue depth in Prometheus text format.
pub fn render_prometheus(stats: &StatsSnapshot, queue_depth: usize) -> String {
    let mut out = String::new();
    let counters = [
        ("reconciles_total", "Reconciliation cycles run.", stats.reconciles),
        ("reconcile_failures_total", "Cycles that ended in an error.", stats.failures),
        ("requeues_total", "Keys requeued with backoff.", stats.requeues),
        ("rescales_total", "Replica count writes applied.", stats.rescales),
    ];
    for (name, help, value) in counters {
        out.push_str(&format!("# HELP stepscale_{name} {help}\n"));
        out.push_str(&format!("# TYPE stepscale_{name} counter\n"));
        out.push_str(&format!("stepscale_{name} {value}\n"));
    }

    out.push_str("# HELP stepscale_queue_depth Keys waiting in the work queue.\n");
    out.push_str("# TYPE stepscale_queue_depth gauge\n");
    out.push_str(&format!("stepscale_queue_depth {queue_depth}\n"));
    out
}
