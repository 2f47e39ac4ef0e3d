//! stepscale-state — embedded resource store for stepscale.
//!
//! Backed by [redb](https://docs.rs/redb), holds the three resource kinds the
//! controller reads and writes when it runs standalone: scaling policies,
//! target scale records, and the member entities of each target.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{resource}/{namespace}/{name}`)
//! identify records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Writes to policies are broadcast to
//! subscribers as `PolicyKey` change notifications.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
