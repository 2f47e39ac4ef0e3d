//! stepscale-autoscale — the scaling decision engine.
//!
//! Turns per-entity utilization windows into a replica proposal and keeps
//! the per-target history that cooldown checks are made against.
//!
//! # Decision Algorithm
//!
//! ```text
//! for each entity matched by the target's selector:
//!     ingest fresh samples into the entity's window
//!     up   |= window holds >= evaluations samples, all >= scale_up_threshold
//!     down |= window holds >= evaluations samples, all <= scale_down_threshold
//!
//! if up and down: down = false         // scale-up wins ties
//! if up:   propose current + scale_up_size
//! if down: propose current - scale_down_size
//! ```
//!
//! The calculator never looks at history. The controller gates a proposal
//! with `ScalingHistoryCache::can_scale_up`/`can_scale_down`, which refuse a
//! direction that was taken within the last `cooldown` cycles.

pub mod calculator;
pub mod history;

pub use calculator::{
    CalculatorError, EntityLister, Proposal, ReplicaCalculator, ScaleDirection, Votes,
    propose_from_votes, window_key,
};
pub use history::{HistoryError, ScalingEvent, ScalingHistoryCache};
