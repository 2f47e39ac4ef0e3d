//! stepscale-metrics — utilization samples for scaling decisions.
//!
//! Fetches per-entity utilization series from a time-series backend and
//! keeps a bounded, expiring window of recent samples per entity.
//!
//! # Architecture
//!
//! ```text
//! MetricsSource (trait)
//!   ├── PrometheusSource   ← query_range over HTTP, one batched query per cycle
//!   └── StaticMetricsSource ← deterministic in-memory fake
//!
//! MetricsWindowCache
//!   ├── ingest()/add()     ← append, evict oldest at capacity
//!   ├── all_above()/all_below() ← threshold votes, false on short windows
//!   └── gc()               ← drop entities idle longer than the TTL
//! ```

pub mod error;
pub mod prometheus;
pub mod source;
pub mod window;

pub use error::{MetricsError, MetricsResult};
pub use prometheus::PrometheusSource;
pub use source::{EntitySeries, MetricsSource, StaticMetricsSource, UtilizationSample};
pub use window::MetricsWindowCache;
