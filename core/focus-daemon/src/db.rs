//! SQLite persistence for focus-daemon.
//!
//! Three small tables: the primary key-value documents, the best-effort
//! synced documents, and the pending alarms. A connection is opened per
//! operation so the alarm thread and socket handlers never share one.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTable {
    Primary,
    Synced,
}

impl DocumentTable {
    fn name(&self) -> &'static str {
        match self {
            DocumentTable::Primary => "documents",
            DocumentTable::Synced => "synced_documents",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRow {
    pub name: String,
    pub fire_at_ms: i64,
    pub period_ms: Option<i64>,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_document(&self, table: DocumentTable, key: &str) -> Result<Option<String>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", table.name()),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| format!("Failed to read document {}: {}", key, err))
        })
    }

    pub fn set_document(
        &self,
        table: DocumentTable,
        key: &str,
        value: &str,
        updated_at: &str,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET \
                        value = excluded.value, \
                        updated_at = excluded.updated_at",
                    table.name()
                ),
                params![key, value, updated_at],
            )
            .map_err(|err| format!("Failed to write document {}: {}", key, err))?;
            Ok(())
        })
    }

    pub fn remove_document(&self, table: DocumentTable, key: &str) -> Result<bool, String> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    &format!("DELETE FROM {} WHERE key = ?1", table.name()),
                    params![key],
                )
                .map_err(|err| format!("Failed to remove document {}: {}", key, err))?;
            Ok(removed > 0)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Alarms
    // ─────────────────────────────────────────────────────────────────────

    pub fn upsert_alarm(&self, alarm: &AlarmRow, armed_at: &str) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO alarms (name, fire_at_ms, period_ms, armed_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(name) DO UPDATE SET \
                    fire_at_ms = excluded.fire_at_ms, \
                    period_ms = excluded.period_ms, \
                    armed_at = excluded.armed_at",
                params![alarm.name, alarm.fire_at_ms, alarm.period_ms, armed_at],
            )
            .map_err(|err| format!("Failed to upsert alarm {}: {}", alarm.name, err))?;
            Ok(())
        })
    }

    pub fn delete_alarm(&self, name: &str) -> Result<bool, String> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM alarms WHERE name = ?1", params![name])
                .map_err(|err| format!("Failed to delete alarm {}: {}", name, err))?;
            Ok(removed > 0)
        })
    }

    pub fn get_alarm(&self, name: &str) -> Result<Option<AlarmRow>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT name, fire_at_ms, period_ms FROM alarms WHERE name = ?1",
                params![name],
                read_alarm,
            )
            .optional()
            .map_err(|err| format!("Failed to read alarm {}: {}", name, err))
        })
    }

    pub fn due_alarms(&self, now_ms: i64) -> Result<Vec<AlarmRow>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, fire_at_ms, period_ms FROM alarms \
                     WHERE fire_at_ms <= ?1 ORDER BY fire_at_ms ASC, name ASC",
                )
                .map_err(|err| format!("Failed to prepare alarms query: {}", err))?;
            let rows = stmt
                .query_map(params![now_ms], read_alarm)
                .map_err(|err| format!("Failed to read alarm rows: {}", err))?;

            let mut alarms = Vec::new();
            for row in rows {
                alarms.push(row.map_err(|err| format!("Failed to decode alarm row: {}", err))?);
            }
            Ok(alarms)
        })
    }

    pub fn count_alarms(&self) -> Result<usize, String> {
        let count = self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM alarms", [], |row| row.get::<_, i64>(0))
                .map_err(|err| format!("Failed to count alarms: {}", err))
        })?;
        Ok(count.max(0) as usize)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS documents (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS synced_documents (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS alarms (
                    name TEXT PRIMARY KEY,
                    fire_at_ms INTEGER NOT NULL,
                    period_ms INTEGER,
                    armed_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_alarms_fire_at ON alarms(fire_at_ms);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

fn read_alarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlarmRow> {
    Ok(AlarmRow {
        name: row.get(0)?,
        fire_at_ms: row.get(1)?,
        period_ms: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn db() -> (tempfile::TempDir, Db) {
        let dir = tempdir().unwrap();
        let db = Db::new(dir.path().join("daemon").join("state.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn documents_upsert_and_remove() {
        let (_dir, db) = db();
        let table = DocumentTable::Primary;
        assert_eq!(db.get_document(table, "gameState").unwrap(), None);

        db.set_document(table, "gameState", "{\"a\":1}", "t1").unwrap();
        db.set_document(table, "gameState", "{\"a\":2}", "t2").unwrap();
        assert_eq!(
            db.get_document(table, "gameState").unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        assert!(db.remove_document(table, "gameState").unwrap());
        assert!(!db.remove_document(table, "gameState").unwrap());
    }

    #[test]
    fn tables_are_independent() {
        let (_dir, db) = db();
        db.set_document(DocumentTable::Synced, "cosmetics", "{}", "t1")
            .unwrap();
        assert_eq!(
            db.get_document(DocumentTable::Primary, "cosmetics").unwrap(),
            None
        );
    }

    #[test]
    fn due_alarms_are_ordered_by_fire_time() {
        let (_dir, db) = db();
        for (name, fire_at_ms) in [("breakEnd", 300), ("sessionEnd", 100), ("later", 900)] {
            db.upsert_alarm(
                &AlarmRow {
                    name: name.to_string(),
                    fire_at_ms,
                    period_ms: None,
                },
                "t0",
            )
            .unwrap();
        }

        let due: Vec<String> = db
            .due_alarms(500)
            .unwrap()
            .into_iter()
            .map(|alarm| alarm.name)
            .collect();
        assert_eq!(due, vec!["sessionEnd", "breakEnd"]);
        assert_eq!(db.count_alarms().unwrap(), 3);
    }

    #[test]
    fn reopening_keeps_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let db = Db::new(path.clone()).unwrap();
            db.set_document(DocumentTable::Primary, "k", "1", "t").unwrap();
        }
        let db = Db::new(path).unwrap();
        assert_eq!(
            db.get_document(DocumentTable::Primary, "k").unwrap().as_deref(),
            Some("1")
        );
    }
}
