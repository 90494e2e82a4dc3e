//! File-backed device cache.
//!
//! The whole cache is a single JSON object persisted with the
//! write-to-temp-then-rename pattern:
//!
//! 1. Serialize the map into `.{name}.tmp` next to the target
//! 2. `fsync` the temporary file
//! 3. Rename it over the target
//!
//! Readers therefore see either the old or the new content, never a partial
//! write. Entries are held in memory after [`FileKeyValueStore::open`].

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::error::{io_error, poisoned, StoreResult};
use super::traits::KeyValueStore;

/// Default file name of the cache inside a data directory.
pub const CACHE_FILENAME: &str = "minipay-cache.json";

/// JSON-file implementation of [`KeyValueStore`].
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens (or creates) the cache at `directory/minipay-cache.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing cache
    /// file cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(directory: P) -> StoreResult<Self> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|e| {
            io_error(
                format!("creating cache directory '{}'", directory.display()),
                e,
            )
        })?;
        let path = directory.join(CACHE_FILENAME);

        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(io_error(format!("reading cache '{}'", path.display()), e))
            }
        };
        log::debug!("[CACHE] opened {} ({} entries)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| CACHE_FILENAME.into(), |n| n.to_string_lossy());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let temp_path = self.temp_path();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| {
                io_error(format!("creating temporary file '{}'", temp_path.display()), e)
            })?;
        file.write_all(&bytes).map_err(|e| {
            io_error(format!("writing temporary file '{}'", temp_path.display()), e)
        })?;
        file.sync_all()
            .map_err(|e| io_error("syncing temporary file", e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| {
            io_error(format!("renaming into '{}'", self.path.display()), e)
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self.entries.write().map_err(|_| poisoned())?;
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.entries.write().map_err(|_| poisoned())?;
        if guard.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let guard = self.entries.read().map_err(|_| poisoned())?;
        Ok(guard
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
