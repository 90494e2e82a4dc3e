//! Local-only durable store.
//!
//! Used when no remote backend is configured. The durable tables are persisted
//! in the device cache under `durable/{table}/{key}`, so callers get the same
//! contract as the remote store, minus cross-device reach.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::StoreResult;
use super::keys::DURABLE_PREFIX;
use super::traits::{DurableStore, InsertOutcome, KeyValueStore};
use super::Table;

/// [`DurableStore`] persisted through a [`KeyValueStore`].
pub struct LocalDurableStore {
    cache: Arc<dyn KeyValueStore>,
}

impl LocalDurableStore {
    /// Wraps `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn KeyValueStore>) -> Self {
        Self { cache }
    }

    fn table_prefix(table: Table) -> String {
        format!("{DURABLE_PREFIX}{table}/")
    }

    fn record_key(table: Table, key: &str) -> String {
        format!("{}{key}", Self::table_prefix(table))
    }
}

#[async_trait]
impl DurableStore for LocalDurableStore {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Value>> {
        self.cache
            .get(&Self::record_key(table, key))?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    async fn upsert(&self, table: Table, key: &str, record: Value) -> StoreResult<()> {
        self.cache
            .put(&Self::record_key(table, key), &record.to_string())
    }

    async fn insert_unique(
        &self,
        table: Table,
        key: &str,
        record: Value,
    ) -> StoreResult<InsertOutcome> {
        let record_key = Self::record_key(table, key);
        if self.cache.contains(&record_key)? {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.cache.put(&record_key, &record.to_string())?;
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        self.cache.delete(&Self::record_key(table, key))
    }

    async fn any(&self, table: Table) -> StoreResult<bool> {
        Ok(!self
            .cache
            .keys_with_prefix(&Self::table_prefix(table))?
            .is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_tables_do_not_leak_into_each_other() {
        let cache = Arc::new(MemoryKeyValueStore::new());
        let store = LocalDurableStore::new(cache.clone());

        store
            .upsert(Table::Vaults, "abc", json!({"ciphertext": "x"}))
            .await
            .unwrap();

        assert!(store.any(Table::Vaults).await.unwrap());
        assert!(!store.any(Table::Identities).await.unwrap());
        assert!(store.get(Table::Identities, "abc").await.unwrap().is_none());
        assert!(cache.contains("durable/encrypted_vaults/abc").unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_insert_unique_refuses() {
        let store = LocalDurableStore::new(Arc::new(MemoryKeyValueStore::new()));

        store
            .upsert(Table::Vaults, "abc", json!({"handle": "alice"}))
            .await
            .unwrap();
        store
            .upsert(Table::Vaults, "abc", json!({"handle": "bob"}))
            .await
            .unwrap();
        let outcome = store
            .insert_unique(Table::Vaults, "abc", json!({"handle": "carol"}))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        let stored = store.get(Table::Vaults, "abc").await.unwrap().unwrap();
        assert_eq!(stored["handle"], "bob");
    }
}
