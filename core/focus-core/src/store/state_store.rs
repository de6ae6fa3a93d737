//! Durable owner of the single game-state document.
//!
//! # Load pipeline
//!
//! ```text
//! backend.get ──► absent? ──► fresh default ──────────────────────────┐
//!       │                                                             │
//!       └──► migrate (raw JSON) ──► validate/repair ──► typed state ──┤
//!                                        │                            │
//!                                        └─ critical ──► backup+reset ┤
//!                                                                     ▼
//!                                              merge synced cosmetics, write back
//! ```
//!
//! A recovered document is written back in its repaired raw form, so keys
//! and number formats this build does not model survive the load untouched.
//!
//! Every backend call goes through [`with_retry`]. Only a failed primary read
//! is surfaced from `load`; write-backs during load are best-effort because
//! the in-memory document is already valid and the next save will retry.
//!
//! # Saves
//!
//! `save` is a no-op when the document equals the last persisted copy. A failed
//! write leaves both the persisted and in-memory copies untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backend::KeyValueStore;
use super::migrate::{MigrationChain, MigrationOutcome};
use super::repair::{validate_document, Validation};
use super::retry::{with_retry, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::error::{FocusError, Result, StorageError};
use crate::events::{EventSink, FocusEvent, NullSink};
use crate::storage::{BACKUP_KEY, GAME_STATE_KEY, SYNCED_COSMETICS_KEY};
use crate::types::{Cosmetics, GameState};

/// Contents of the backup slot written before a corruption reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub original_document: Value,
    #[serde(default)]
    pub reason: String,
}

/// What `load` found and did.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub state: GameState,
    pub created: bool,
    pub migration: Option<MigrationOutcome>,
    pub repaired_sections: Vec<&'static str>,
    pub reset_reason: Option<String>,
    pub cosmetics_merged: bool,
}

pub struct StateStore {
    primary: Box<dyn KeyValueStore>,
    synced: Option<Box<dyn KeyValueStore>>,
    retry: RetryPolicy,
    migrations: MigrationChain,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    current: Option<GameState>,
    persisted: Option<GameState>,
}

impl StateStore {
    pub fn new(primary: impl KeyValueStore + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            synced: None,
            retry: RetryPolicy::default(),
            migrations: MigrationChain::default(),
            clock: Arc::new(SystemClock),
            events: Arc::new(NullSink),
            current: None,
            persisted: None,
        }
    }

    pub fn with_synced(mut self, synced: impl KeyValueStore + 'static) -> Self {
        self.synced = Some(Box::new(synced));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_migrations(mut self, migrations: MigrationChain) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn schema_version(&self) -> u32 {
        self.migrations.current_version()
    }

    /// Latest in-memory document, if loaded.
    pub fn current(&self) -> Option<&GameState> {
        self.current.as_ref()
    }

    /// Latest document, loading it on first use.
    pub fn snapshot(&mut self) -> Result<GameState> {
        match &self.current {
            Some(state) => Ok(state.clone()),
            None => self.load(),
        }
    }

    pub fn load(&mut self) -> Result<GameState> {
        self.load_with_report().map(|report| report.state)
    }

    pub fn load_with_report(&mut self) -> Result<LoadReport> {
        let raw = self.read(GAME_STATE_KEY)?;

        let (mut report, mut document) = match raw {
            None => {
                tracing::info!(
                    schema_version = self.schema_version(),
                    "No stored game state; creating defaults"
                );
                let report = LoadReport {
                    state: GameState::with_schema_version(self.schema_version()),
                    created: true,
                    migration: None,
                    repaired_sections: Vec::new(),
                    reset_reason: None,
                    cosmetics_merged: false,
                };
                (report, None)
            }
            Some(raw) => self.recover(raw),
        };

        report.cosmetics_merged = self.merge_synced_cosmetics(&mut report.state);
        if report.cosmetics_merged {
            if let Some(document) = document.as_mut() {
                overlay_owned_cosmetics(document, &report.state.player.cosmetics);
            }
        }

        let needs_write = report.created
            || report.migration.as_ref().map(|m| m.changed()).unwrap_or(false)
            || !report.repaired_sections.is_empty()
            || report.reset_reason.is_some()
            || report.cosmetics_merged;

        self.current = Some(report.state.clone());
        if needs_write {
            self.persisted = None;
            let written = match document.take() {
                Some(document) => self.write_value(&Value::Object(document), &report.state),
                None => self.write_document(&report.state),
            };
            if let Err(err) = written {
                tracing::warn!(error = %err, "Failed to write back loaded game state");
            }
        } else {
            self.persisted = Some(report.state.clone());
        }

        Ok(report)
    }

    /// Persists `state` unless it equals the last persisted copy. Returns
    /// whether a write happened.
    pub fn save(&mut self, state: &GameState) -> Result<bool> {
        if self.persisted.as_ref() == Some(state) {
            tracing::debug!("Game state unchanged; skipping write");
            return Ok(false);
        }

        let previous_cosmetics = self
            .persisted
            .as_ref()
            .map(|persisted| persisted.player.cosmetics.clone());

        self.write_document(state)?;
        self.current = Some(state.clone());

        if state.settings.sync_cosmetics
            && previous_cosmetics.as_ref() != Some(&state.player.cosmetics)
        {
            self.push_synced_cosmetics(&state.player.cosmetics);
        }

        Ok(true)
    }

    pub fn get_backup(&self) -> Result<Option<Backup>> {
        let Some(raw) = self.read(BACKUP_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_value::<Backup>(raw) {
            Ok(backup) => Ok(Some(backup)),
            Err(err) => {
                tracing::warn!(error = %err, "Backup slot is unreadable; ignoring");
                Ok(None)
            }
        }
    }

    pub fn delete_backup(&self) -> Result<()> {
        with_retry(&self.retry, "delete backup", |_| self.primary.remove(BACKUP_KEY))
            .map_err(|err| self.storage_failure("delete backup", err.attempts, err.last))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn read(&self, key: &str) -> Result<Option<Value>> {
        with_retry(&self.retry, "read", |_| self.primary.get(key))
            .map_err(|err| self.storage_failure("read", err.attempts, err.last))
    }

    fn write_document(&mut self, state: &GameState) -> Result<()> {
        let value = serde_json::to_value(state).map_err(|source| FocusError::Json {
            context: "serialize game state".to_string(),
            source,
        })?;
        self.write_value(&value, state)
    }

    /// Writes `value` as the stored form of `state`.
    fn write_value(&mut self, value: &Value, state: &GameState) -> Result<()> {
        with_retry(&self.retry, "save", |_| {
            self.primary.set(GAME_STATE_KEY, value)
        })
        .map_err(|err| self.storage_failure("save", err.attempts, err.last))?;
        self.persisted = Some(state.clone());
        Ok(())
    }

    fn storage_failure(&self, operation: &str, attempts: u32, source: StorageError) -> FocusError {
        tracing::error!(operation, attempts, error = %source, "Storage operation failed");
        self.events.emit(FocusEvent::StorageFailed {
            operation: operation.to_string(),
            message: source.to_string(),
        });
        FocusError::Storage { attempts, source }
    }

    /// Migrates and repairs a stored document; resets it when unrecoverable.
    /// Also returns the repaired raw document unless the state was reset.
    fn recover(&self, raw: Value) -> (LoadReport, Option<Map<String, Value>>) {
        let original = raw.clone();
        let mut raw = raw;

        let migration = match &mut raw {
            Value::Object(doc) => Some(self.migrations.migrate(doc)),
            _ => None,
        };

        let (document, repaired_sections) = match validate_document(&raw) {
            Validation::Healthy(document) => (document, Vec::new()),
            Validation::Repaired { document, sections } => {
                tracing::warn!(sections = ?sections, "Repaired game state sections");
                (document, sections)
            }
            Validation::Corrupt(corruption) => {
                return (self.reset(original, corruption.reason), None)
            }
        };

        match serde_json::from_value::<GameState>(Value::Object(document.clone())) {
            Ok(state) => {
                let report = LoadReport {
                    state,
                    created: false,
                    migration,
                    repaired_sections,
                    reset_reason: None,
                    cosmetics_merged: false,
                };
                (report, Some(document))
            }
            Err(err) => (
                self.reset(original, format!("repaired document unreadable: {}", err)),
                None,
            ),
        }
    }

    fn reset(&self, original: Value, reason: String) -> LoadReport {
        tracing::error!(reason = %reason, "Game state critically corrupted; resetting to defaults");

        let backup = Backup {
            timestamp: self.clock.now(),
            original_document: original,
            reason: reason.clone(),
        };
        let backup_saved = match serde_json::to_value(&backup) {
            Ok(value) => {
                match with_retry(&self.retry, "write backup", |_| {
                    self.primary.set(BACKUP_KEY, &value)
                }) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(error = %err.last, "Failed to write corruption backup");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize corruption backup");
                false
            }
        };

        self.events.emit(FocusEvent::StateReset {
            reason: reason.clone(),
            backup_saved,
        });

        LoadReport {
            state: GameState::with_schema_version(self.schema_version()),
            created: false,
            migration: None,
            repaired_sections: Vec::new(),
            reset_reason: Some(reason),
            cosmetics_merged: false,
        }
    }

    /// Unions owned cosmetics from the synced store into `state`. Active
    /// selections stay local.
    fn merge_synced_cosmetics(&self, state: &mut GameState) -> bool {
        if !state.settings.sync_cosmetics {
            return false;
        }
        let Some(synced) = &self.synced else {
            return false;
        };

        let remote = match synced.get(SYNCED_COSMETICS_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(error = %err, "Synced cosmetics unavailable; using local copy");
                return false;
            }
        };
        let remote: Cosmetics = match serde_json::from_value(remote) {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(error = %err, "Synced cosmetics malformed; ignoring");
                return false;
            }
        };

        let local = &mut state.player.cosmetics;
        let merged_themes: BTreeSet<String> =
            local.owned_themes.union(&remote.owned_themes).cloned().collect();
        let merged_sprites: BTreeSet<String> = local
            .owned_sprites
            .union(&remote.owned_sprites)
            .cloned()
            .collect();
        let changed =
            merged_themes != local.owned_themes || merged_sprites != local.owned_sprites;
        if changed {
            tracing::info!(
                themes = merged_themes.len(),
                sprites = merged_sprites.len(),
                "Merged synced cosmetics"
            );
            local.owned_themes = merged_themes;
            local.owned_sprites = merged_sprites;
        }
        changed
    }

    fn push_synced_cosmetics(&self, cosmetics: &Cosmetics) {
        let Some(synced) = &self.synced else {
            return;
        };
        let value = match serde_json::to_value(cosmetics) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize cosmetics for sync");
                return;
            }
        };
        if let Err(err) = synced.set(SYNCED_COSMETICS_KEY, &value) {
            tracing::warn!(error = %err, "Failed to push cosmetics to synced store");
        }
    }
}

/// Copies merged ownership sets into the raw document's cosmetics record.
fn overlay_owned_cosmetics(document: &mut Map<String, Value>, cosmetics: &Cosmetics) {
    let Some(Value::Object(record)) = document
        .get_mut("player")
        .and_then(|player| player.get_mut("cosmetics"))
    else {
        return;
    };
    let owned = |set: &BTreeSet<String>| Value::Array(set.iter().cloned().map(Value::String).collect());
    record.insert("ownedThemes".to_string(), owned(&cosmetics.owned_themes));
    record.insert("ownedSprites".to_string(), owned(&cosmetics.owned_sprites));
}
