//! Key-value backends the state store persists through.
//!
//! Backends deal in raw JSON values so the store can inspect (and repair)
//! documents that no longer match the typed schema.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage::StorageConfig;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Shared in-memory store. Clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: Value) -> Self {
        let store = Self::new();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(key.to_string(), value);
        }
        store
    }

    /// Direct read that bypasses the trait; handy for assertions.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::new("get", key, "memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::new("set", key, "memory store poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::new("remove", key, "memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed
// ─────────────────────────────────────────────────────────────────────────────

/// One pretty-printed JSON file per key inside a directory.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so a process killed mid-write leaves the previous document intact.
///
/// A file that is not valid JSON is returned as a JSON string holding the raw
/// text; the store then treats it as a corrupted document (and backs it up)
/// instead of failing the load.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(StorageConfig::key_file_name(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key);
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::new("get", key, err.to_string())),
        };

        if content.trim().is_empty() {
            tracing::warn!(key, path = %path.display(), "Empty document file; treating as absent");
            return Ok(None);
        }

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(
                    key,
                    path = %path.display(),
                    error = %err,
                    "Document file is not valid JSON"
                );
                Ok(Some(Value::String(content)))
            }
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        fs_err::create_dir_all(&self.dir)
            .map_err(|err| StorageError::new("set", key, err.to_string()))?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|err| StorageError::new("set", key, format!("serialize: {}", err)))?;

        let mut temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|err| StorageError::new("set", key, format!("temp file: {}", err)))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| StorageError::new("set", key, format!("write: {}", err)))?;
        temp_file
            .flush()
            .map_err(|err| StorageError::new("set", key, format!("flush: {}", err)))?;
        temp_file
            .persist(self.path_for(key))
            .map_err(|err| StorageError::new("set", key, format!("persist: {}", err.error)))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs_err::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::new("remove", key, err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", &json!({"a": 1})).unwrap();
        assert_eq!(other.get("k").unwrap(), Some(json!({"a": 1})));
        other.remove("k").unwrap();
        assert!(store.peek("k").is_none());
    }

    #[test]
    fn file_store_round_trip() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path().join("docs"));
        assert_eq!(store.get("gameState").unwrap(), None);

        store.set("gameState", &json!({"schemaVersion": 2})).unwrap();
        assert_eq!(
            store.get("gameState").unwrap(),
            Some(json!({"schemaVersion": 2}))
        );
    }

    #[test]
    fn file_store_remove_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path());
        store.set("k", &json!(1)).unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_returns_invalid_json_as_raw_string() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path());
        std::fs::write(temp.path().join("gameState.json"), "{not json").unwrap();

        assert_eq!(
            store.get("gameState").unwrap(),
            Some(Value::String("{not json".to_string()))
        );
    }

    #[test]
    fn file_store_treats_empty_file_as_absent() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path());
        std::fs::write(temp.path().join("gameState.json"), "  \n").unwrap();
        assert_eq!(store.get("gameState").unwrap(), None);
    }
}
