//! Version-indexed schema migrations.
//!
//! Each migration is a pure transform from version `n` to `n + 1` over the
//! raw JSON document. Migrations run once each, in strictly increasing order,
//! until the document reaches the chain's current version. A document newer
//! than the chain is left alone.

use serde_json::{Map, Value};

use crate::types::CURRENT_SCHEMA_VERSION;

const VERSION_KEY: &str = "schemaVersion";

pub type MigrationFn = fn(&mut Map<String, Value>);

#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub description: &'static str,
    pub apply: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("description", &self.description)
            .finish()
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 0,
        description: "stamp schemaVersion on legacy documents",
        apply: migrate_v0_to_v1,
    },
    Migration {
        from: 1,
        description: "statistics.totalFocusMinutes -> totalFocusSeconds",
        apply: migrate_v1_to_v2,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: u32,
    pub to: u32,
}

impl MigrationOutcome {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
pub struct MigrationChain {
    migrations: Vec<Migration>,
    current: u32,
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self::up_to(CURRENT_SCHEMA_VERSION)
    }
}

impl MigrationChain {
    /// The chain truncated so that `version` is current.
    pub fn up_to(version: u32) -> Self {
        let current = version.min(MIGRATIONS.len() as u32);
        Self {
            migrations: MIGRATIONS
                .iter()
                .copied()
                .filter(|m| m.from < current)
                .collect(),
            current,
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    pub fn migrate(&self, doc: &mut Map<String, Value>) -> MigrationOutcome {
        let from = document_version(doc);

        if from > self.current {
            tracing::warn!(
                document_version = from,
                current_version = self.current,
                "Document is newer than this build; skipping migration"
            );
            return MigrationOutcome { from, to: from };
        }

        let mut version = from;
        while version < self.current {
            if let Some(migration) = self.migrations.iter().find(|m| m.from == version) {
                tracing::info!(
                    from = version,
                    to = version + 1,
                    description = migration.description,
                    "Applying schema migration"
                );
                (migration.apply)(doc);
            }
            version += 1;
            doc.insert(VERSION_KEY.to_string(), Value::from(version));
        }

        MigrationOutcome { from, to: version }
    }
}

/// Reads `schemaVersion`; anything that isn't a non-negative integer is 0.
pub fn document_version(doc: &Map<String, Value>) -> u32 {
    doc.get(VERSION_KEY)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn migrate_v0_to_v1(_doc: &mut Map<String, Value>) {}

fn migrate_v1_to_v2(doc: &mut Map<String, Value>) {
    let Some(Value::Object(statistics)) = doc.get_mut("statistics") else {
        return;
    };
    let Some(minutes) = statistics.remove("totalFocusMinutes") else {
        return;
    };
    if statistics.contains_key("totalFocusSeconds") {
        return;
    }
    if let Some(minutes) = minutes.as_f64().filter(|m| m.is_finite() && *m >= 0.0) {
        let seconds = (minutes * 60.0).round() as u64;
        statistics.insert("totalFocusSeconds".to_string(), Value::from(seconds));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn unversioned_document_reaches_current() {
        let mut doc = object(json!({"player": {"level": 3}}));
        let outcome = MigrationChain::default().migrate(&mut doc);
        assert_eq!(outcome, MigrationOutcome { from: 0, to: 2 });
        assert_eq!(doc["schemaVersion"], 2);
        assert_eq!(doc["player"], json!({"level": 3}));
    }

    #[test]
    fn truncated_chain_stops_at_its_current_version() {
        let mut doc = object(json!({"statistics": {"totalFocusMinutes": 3}}));
        let outcome = MigrationChain::up_to(1).migrate(&mut doc);
        assert_eq!(outcome.to, 1);
        assert_eq!(doc["statistics"], json!({"totalFocusMinutes": 3}));
    }

    #[test]
    fn focus_minutes_become_seconds() {
        let mut doc = object(json!({
            "schemaVersion": 1,
            "statistics": {"totalFocusMinutes": 90, "totalSessions": 4}
        }));
        MigrationChain::default().migrate(&mut doc);
        assert_eq!(
            doc["statistics"],
            json!({"totalFocusSeconds": 5400, "totalSessions": 4})
        );
    }

    #[test]
    fn current_document_is_untouched() {
        let original = json!({"schemaVersion": 2, "statistics": {"totalFocusMinutes": 1}});
        let mut doc = object(original.clone());
        let outcome = MigrationChain::default().migrate(&mut doc);
        assert!(!outcome.changed());
        assert_eq!(Value::Object(doc), original);
    }

    #[test]
    fn newer_document_is_not_downgraded() {
        let mut doc = object(json!({"schemaVersion": 9}));
        let outcome = MigrationChain::default().migrate(&mut doc);
        assert_eq!(outcome, MigrationOutcome { from: 9, to: 9 });
        assert_eq!(doc["schemaVersion"], 9);
    }

    #[test]
    fn string_version_is_treated_as_legacy() {
        let mut doc = object(json!({"schemaVersion": "2"}));
        assert_eq!(document_version(&doc), 0);
        MigrationChain::default().migrate(&mut doc);
        assert_eq!(doc["schemaVersion"], 2);
    }
}
