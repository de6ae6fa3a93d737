//! Storage configuration and path management for Focus Quest.
//!
//! All on-disk locations are decided here so tests can inject a temp root
//! with `StorageConfig::with_root()`.

use std::path::PathBuf;

use crate::error::{FocusError, Result};

/// Key of the primary game-state document.
pub const GAME_STATE_KEY: &str = "gameState";
/// Key of the backup slot written before a corruption reset.
pub const BACKUP_KEY: &str = "gameStateBackup";
/// Key of the cosmetics record in the synced store.
pub const SYNCED_COSMETICS_KEY: &str = "cosmetics";

/// Central configuration for all Focus Quest storage paths.
///
/// Production code uses `StorageConfig::from_home()` which points to
/// `~/.focusquest/`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(FocusError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(".focusquest"),
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (tunable retry, timer and idle settings).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the daemon IPC socket.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    /// Path to the daemon's SQLite database (documents + alarms).
    pub fn daemon_db_file(&self) -> PathBuf {
        self.root.join("daemon").join("state.db")
    }

    /// Maps a document key to a file name inside a store directory.
    ///
    /// Keys are restricted to ASCII alphanumerics, `-` and `_`; anything else
    /// is replaced with `_` so a key can never escape the directory.
    pub fn key_file_name(key: &str) -> String {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.json", sanitized)
    }
}
