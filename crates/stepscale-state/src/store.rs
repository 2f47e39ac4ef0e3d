//! StateStore — redb-backed resource persistence for stepscale.
//!
//! Provides typed CRUD operations over policies, target scales, and
//! entities. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use stepscale_core::PolicyKey;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type TableDef = TableDefinition<'static, &'static str, &'static [u8]>;

/// Pending change notifications kept per subscriber before it lags.
const NOTIFY_CAPACITY: usize = 1024;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    changes: broadcast::Sender<PolicyKey>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> Self {
        let (changes, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            db: Arc::new(db),
            changes,
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(ENTITIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to policy create/update notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyKey> {
        self.changes.subscribe()
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or update a policy and notify subscribers.
    pub fn put_policy(&self, policy: &ScalingPolicy) -> StateResult<()> {
        let key = policy.table_key();
        self.put(POLICIES, &key, policy)?;
        debug!(%key, "policy stored");
        // No subscribers is fine: the next resync picks the policy up.
        let _ = self.changes.send(policy.key());
        Ok(())
    }

    /// Get a policy by namespace and name.
    pub fn get_policy(&self, namespace: &str, name: &str) -> StateResult<Option<ScalingPolicy>> {
        self.get(POLICIES, &format!("{namespace}/{name}"))
    }

    /// List all policies.
    pub fn list_policies(&self) -> StateResult<Vec<ScalingPolicy>> {
        self.list(POLICIES, "")
    }

    /// Delete a policy. Returns true if it existed.
    pub fn delete_policy(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let key = format!("{namespace}/{name}");
        let existed = self.remove(POLICIES, &key)?;
        debug!(%key, existed, "policy deleted");
        Ok(existed)
    }

    /// Replace only the status of a stored policy.
    ///
    /// The spec on disk wins over the caller's copy, so a concurrent spec
    /// edit is never reverted by a status write. Does not notify.
    pub fn update_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PolicyStatus,
    ) -> StateResult<()> {
        let key = format!("{namespace}/{name}");
        self.modify(POLICIES, &key, |policy: &mut ScalingPolicy| {
            policy.status = status.clone();
        })
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert or update a target scale record.
    pub fn put_target(&self, scale: &TargetScale) -> StateResult<()> {
        let key = scale.table_key();
        self.put(TARGETS, &key, scale)?;
        debug!(%key, replicas = scale.spec_replicas, "target stored");
        Ok(())
    }

    /// Get a target scale by resource, namespace, and name.
    pub fn get_target(
        &self,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<TargetScale>> {
        self.get(TARGETS, &target_key(resource, namespace, name))
    }

    /// Set a target's spec replicas in one write transaction.
    pub fn set_target_replicas(
        &self,
        resource: &str,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> StateResult<()> {
        let key = target_key(resource, namespace, name);
        self.modify(TARGETS, &key, |scale: &mut TargetScale| {
            scale.spec_replicas = replicas;
        })?;
        debug!(%key, replicas, "target replicas updated");
        Ok(())
    }

    // ── Entities ───────────────────────────────────────────────────

    /// Insert or update a member entity.
    pub fn put_entity(&self, entity: &Entity) -> StateResult<()> {
        self.put(ENTITIES, &entity.table_key(), entity)
    }

    /// List all entities in a namespace.
    pub fn list_entities(&self, namespace: &str) -> StateResult<Vec<Entity>> {
        self.list(ENTITIES, &format!("{namespace}/"))
    }

    /// Delete an entity. Returns true if it existed.
    pub fn delete_entity(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(ENTITIES, &format!("{namespace}/{name}"))
    }

    // ── Table helpers ──────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: TableDef, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: TableDef, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: TableDef, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: TableDef, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a record inside a single write transaction.
    fn modify<T, F>(&self, table: TableDef, key: &str, f: F) -> StateResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let mut record: T = {
                let guard = table
                    .get(key)
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(key.to_string()))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            f(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}
