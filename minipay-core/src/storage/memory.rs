//! In-memory implementations of the storage traits.
//!
//! These back tests and offline demos. Nothing is persisted; dropping the
//! store drops the data.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::error::{poisoned, StoreError, StoreResult};
use super::traits::{DurableStore, InsertOutcome, KeyValueStore};
use super::Table;

// =============================================================================
// Memory Key-Value Store
// =============================================================================

/// In-memory device cache backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Creates a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }

    /// Returns `true` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let guard = self.entries.read().map_err(|_| poisoned())?;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// =============================================================================
// Memory Durable Store
// =============================================================================

/// In-memory durable store with a switch to simulate backend outages.
///
/// Share one instance (behind an `Arc`) between several registries to model
/// several devices talking to the same backend.
#[derive(Debug)]
pub struct MemoryDurableStore {
    tables: RwLock<HashMap<Table, BTreeMap<String, Value>>>,
    available: AtomicBool,
}

impl MemoryDurableStore {
    /// Creates a new, reachable, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self, table: Table) -> StoreResult<usize> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        Ok(guard.get(&table).map_or(0, BTreeMap::len))
    }

    /// Reads a record without going through the availability switch.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn peek(&self, table: Table, key: &str) -> StoreResult<Option<Value>> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        Ok(guard.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory durable store is offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Value>> {
        self.ensure_available()?;
        self.peek(table, key)
    }

    async fn upsert(&self, table: Table, key: &str, record: Value) -> StoreResult<()> {
        self.ensure_available()?;
        self.tables
            .write()
            .map_err(|_| poisoned())?
            .entry(table)
            .or_default()
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn insert_unique(
        &self,
        table: Table,
        key: &str,
        record: Value,
    ) -> StoreResult<InsertOutcome> {
        self.ensure_available()?;
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let rows = guard.entry(table).or_default();
        if rows.contains_key(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        rows.insert(key.to_string(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        self.ensure_available()?;
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        if let Some(rows) = guard.get_mut(&table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn any(&self, table: Table) -> StoreResult<bool> {
        self.ensure_available()?;
        Ok(self.len(table)? > 0)
    }
}
