//! Persistence for the game-state document.
//!
//! - `backend`: the key-value seam plus memory and file implementations
//! - `retry`: bounded exponential backoff around backend calls
//! - `migrate`: version-indexed schema migrations over raw JSON
//! - `repair`: field-level validation, repair, and corruption detection
//! - `state_store`: the load/save pipeline tying the above together

mod backend;
mod migrate;
mod repair;
mod retry;
mod state_store;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use migrate::{document_version, Migration, MigrationChain, MigrationOutcome};
pub use repair::{critical_corruption, validate_document, Corruption, Validation};
pub use retry::{with_retry, RetryError, RetryPolicy};
pub use state_store::{Backup, LoadReport, StateStore};
