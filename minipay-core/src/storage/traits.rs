//! Storage interfaces injected into the registries and the vault service.

use async_trait::async_trait;
use serde_json::Value;

use super::{error::StoreResult, Table};

/// Device-resident key-value cache.
///
/// Each component owns a disjoint key prefix (see [`super::keys`]). Individual
/// writes are serialized by the implementation; no multi-key atomicity is
/// provided.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Lists every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Checks whether `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Outcome of [`DurableStore::insert_unique`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A record already exists under the key; nothing was written.
    AlreadyExists,
}

/// Durable shared store, authoritative for cross-device state.
///
/// Records are JSON objects addressed by `(table, key)`. Implementations must
/// report an unreachable backend as [`super::StoreError::Unavailable`] so callers
/// can degrade where that is allowed.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetches the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the query.
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Value>>;

    /// Inserts or replaces the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the write.
    async fn upsert(&self, table: Table, key: &str, record: Value) -> StoreResult<()>;

    /// Inserts the record only if `key` is free.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the write.
    async fn insert_unique(
        &self,
        table: Table,
        key: &str,
        record: Value,
    ) -> StoreResult<InsertOutcome>;

    /// Deletes the record stored under `key`. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the delete.
    async fn delete(&self, table: Table, key: &str) -> StoreResult<()>;

    /// Reports whether `table` holds at least one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or refuses the query.
    async fn any(&self, table: Table) -> StoreResult<bool>;
}
