//! redb table definitions for the stepscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Scaling policies keyed by `{namespace}/{name}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Target scale records keyed by `{resource}/{namespace}/{name}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Member entities keyed by `{namespace}/{name}`.
pub const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");
