//! stepscale-controller — policy reconciliation.
//!
//! Keeps every scaling policy's target at the replica count its metrics
//! call for. Keys (`namespace/name`) flow through a deduplicating,
//! rate-limited work queue to a fixed pool of workers, each running one
//! reconciliation cycle at a time.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├── WorkQueue<String>      (dedup, in-flight tracking, per-key backoff)
//!   ├── workers × N ──► Reconciler
//!   │                    ├── PolicyStore    (policy + status)
//!   │                    ├── ResourceMapper (apiVersion/kind → resources)
//!   │                    ├── ScaleClient    (target scale get/update)
//!   │                    ├── ReplicaCalculator ──► MetricsWindowCache
//!   │                    └── ScalingHistoryCache (cooldown gates)
//!   ├── store notifications ─► enqueue
//!   ├── resync ticker ───────► enqueue all
//!   └── GC ticker ───────────► window + history gc
//! ```

pub mod client;
pub mod controller;
pub mod error;
pub mod mapper;
pub mod queue;
pub mod reconciler;
pub mod stats;

pub use client::{EntityLister, PolicyStore, ScaleClient};
pub use controller::{Controller, ControllerSettings};
pub use error::{ControllerError, ControllerResult};
pub use mapper::{GroupVersion, ResourceMapper, ResourceMapping, StaticResourceMapper};
pub use queue::WorkQueue;
pub use reconciler::{Outcome, Reconciler};
pub use stats::{ControllerStats, StatsSnapshot, render_prometheus};
