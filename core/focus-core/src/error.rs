//! Error types for focus-core operations.
//!
//! Corruption of the persisted document is deliberately absent here: it is
//! always resolved inside the store by repair or reset and never reaches a
//! caller.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure reported by a key-value backend for a single attempt.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{operation} {key}: {message}")]
pub struct StorageError {
    pub operation: &'static str,
    pub key: String,
    pub message: String,
}

impl StorageError {
    pub fn new(operation: &'static str, key: &str, message: impl Into<String>) -> Self {
        Self {
            operation,
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Failure reported by the delayed-callback scheduler.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("scheduler {timer}: {message}")]
pub struct SchedulerError {
    pub timer: String,
    pub message: String,
}

impl SchedulerError {
    pub fn new(timer: &str, message: impl Into<String>) -> Self {
        Self {
            timer: timer.to_string(),
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Core Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can surface from focus-core operations.
#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    // ─────────────────────────────────────────────────────────────────────
    // Caller Errors (rejected synchronously, never retried)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No active {0}")]
    NotActive(&'static str),

    #[error("Session is not paused")]
    NotPaused,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors (surfaced after the retry ceiling)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage failed after {attempts} attempts: {source}")]
    Storage {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Scheduler failed after {attempts} attempts: {source}")]
    Scheduler {
        attempts: u32,
        #[source]
        source: SchedulerError,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

impl FocusError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        FocusError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Short machine-readable code, used on the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            FocusError::Validation { .. } => "validation_error",
            FocusError::Conflict(_) => "conflict_error",
            FocusError::NotActive(_) | FocusError::NotPaused => "not_active_error",
            FocusError::Storage { .. } => "storage_error",
            FocusError::Scheduler { .. } => "scheduler_error",
            FocusError::Json { .. } => "serialization_error",
            FocusError::ConfigMalformed { .. } | FocusError::HomeDirNotFound => "config_error",
        }
    }
}

/// Convenience type alias for Results using FocusError.
pub type Result<T> = std::result::Result<T, FocusError>;

impl From<FocusError> for String {
    fn from(err: FocusError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_display_includes_key() {
        let err = FocusError::Storage {
            attempts: 3,
            source: StorageError::new("set", "gameState", "disk full"),
        };
        assert_eq!(
            err.to_string(),
            "Storage failed after 3 attempts: set gameState: disk full"
        );
        assert_eq!(err.code(), "storage_error");
    }

    #[test]
    fn not_paused_shares_not_active_code() {
        assert_eq!(FocusError::NotPaused.code(), "not_active_error");
        assert_eq!(FocusError::NotActive("session").code(), "not_active_error");
    }
}
