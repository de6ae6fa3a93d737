//! # focus-core
//!
//! Core library for Focus Quest: the persistent session-lifecycle subsystem
//! shared by the daemon and any other host.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Hosts deliver timer
//!   callbacks on whatever thread they like.
//! - **Single writer**: One `ScheduleReconciler` owns one `StateStore`; every
//!   mutation is serialized through it.
//! - **Suspension-safe**: Deadlines are derived from persisted start times, so
//!   a host killed between any two operations settles correctly on resume.
//! - **Never fatal**: Corruption is repaired or reset inside the store and
//!   storage failures surface as errors and events, never panics.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use focus_core::{FileStore, ManualScheduler, ScheduleReconciler, StartRequest, StateStore};
//!
//! let store = StateStore::new(FileStore::new("/tmp/focus"));
//! let reconciler = ScheduleReconciler::new(store, Arc::new(ManualScheduler::new()));
//! reconciler.reconcile_on_resume()?;
//! reconciler.start_session(StartRequest::default())?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, FocusConfig, IdleConfig, RetryConfig, TimerConfig};
pub use error::{FocusError, Result, SchedulerError, StorageError};
pub use events::{ChannelSink, EventSink, FocusEvent, LogSink, MemorySink, NullSink};
pub use reconcile::*;
pub use session::SessionResult;
pub use storage::{StorageConfig, BACKUP_KEY, GAME_STATE_KEY, SYNCED_COSMETICS_KEY};
pub use store::{
    Backup, FileStore, KeyValueStore, LoadReport, MemoryStore, MigrationChain, MigrationOutcome,
    RetryPolicy, StateStore,
};
pub use types::*;
