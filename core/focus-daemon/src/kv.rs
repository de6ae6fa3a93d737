//! `KeyValueStore` over the daemon's SQLite document tables.

use std::sync::Arc;

use chrono::Utc;
use focus_core::{KeyValueStore, StorageError};
use serde_json::Value;

use crate::db::{Db, DocumentTable};

pub struct SqliteKv {
    db: Arc<Db>,
    table: DocumentTable,
}

impl SqliteKv {
    pub fn primary(db: Arc<Db>) -> Self {
        Self {
            db,
            table: DocumentTable::Primary,
        }
    }

    pub fn synced(db: Arc<Db>) -> Self {
        Self {
            db,
            table: DocumentTable::Synced,
        }
    }
}

impl KeyValueStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self
            .db
            .get_document(self.table, key)
            .map_err(|err| StorageError::new("get", key, err))?
        else {
            return Ok(None);
        };

        // Unparseable text is handed back verbatim so the store can back it up.
        Ok(Some(
            serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        ))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let text =
            serde_json::to_string(value).map_err(|err| StorageError::new("set", key, err.to_string()))?;
        self.db
            .set_document(self.table, key, &text, &Utc::now().to_rfc3339())
            .map_err(|err| StorageError::new("set", key, err))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db
            .remove_document(self.table, key)
            .map(|_| ())
            .map_err(|err| StorageError::new("remove", key, err))
    }
}
