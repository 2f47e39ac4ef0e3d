//! stepscale-core — shared types for the stepscale workspace.
//!
//! - [`config`]: `stepscale.toml` controller configuration and duration parsing
//! - [`selector`]: equality-based label selectors used to enumerate entities
//! - [`types`]: policy keys shared by the store, queue, and controller

pub mod config;
pub mod selector;
pub mod types;

pub use config::{ConfigError, ControllerConfig, parse_duration};
pub use selector::{LabelSelector, SelectorError};
pub use types::*;
