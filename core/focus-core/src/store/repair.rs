//! Declarative validation and field-level repair of the raw document.
//!
//! Each section is described by a table of [`FieldRule`]s. A rule either keeps
//! the stored value, coerces it (e.g. floors `3.7` to `3`), or replaces it with
//! the section default. Unknown keys are never removed. A section is replaced
//! wholesale only when it is absent or not a JSON object.
//!
//! A document is declared critically corrupt (and must be reset) when fewer
//! than two of `player`, `progression`, `settings`, `statistics` are objects,
//! when `player.level` is not a number, or when `player.stats` is not an
//! object.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::types::{
    Goal, Player, Progression, Settings, Statistics, MAX_BREAK_MINUTES, MAX_SESSION_MINUTES,
    MIN_BREAK_MINUTES, MIN_SESSION_MINUTES, DEFAULT_SPRITE, DEFAULT_THEME,
};

const U32: u64 = u32::MAX as u64;
const U64: u64 = u64::MAX;
/// Largest epoch-millisecond value chrono can represent comfortably (year 9999).
const MAX_TIMESTAMP_MS: u64 = 253_402_300_799_999;

const CORE_SECTIONS: [&str; 4] = ["player", "progression", "settings", "statistics"];

/// A value paired with whether repair changed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    pub value: T,
    pub repaired: bool,
}

impl<T> Repaired<T> {
    fn kept(value: T) -> Self {
        Self {
            value,
            repaired: false,
        }
    }

    fn changed(value: T) -> Self {
        Self {
            value,
            repaired: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rules
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Integer in `min..=max`; finite non-negative numbers are floored.
    Integer { min: u64, max: u64 },
    /// Any JSON number. Zero is a valid value.
    Number,
    Bool,
    Text,
    OptionalText,
    /// Epoch milliseconds.
    Timestamp,
    OptionalTimestamp,
    /// `YYYY-MM-DD` or null.
    OptionalDate,
    /// Array of strings; non-string entries are dropped.
    TextSet,
    /// Array of integers `<= max`; other entries are dropped.
    IntegerSet { max: u64 },
    Record(&'static [FieldRule]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub key: &'static str,
    pub kind: FieldKind,
}

const fn rule(key: &'static str, kind: FieldKind) -> FieldRule {
    FieldRule { key, kind }
}

const fn int(min: u64, max: u64) -> FieldKind {
    FieldKind::Integer { min, max }
}

const STATS_RULES: &[FieldRule] = &[
    rule("spirit", FieldKind::Number),
    rule("harmony", FieldKind::Number),
    rule("soulflow", FieldKind::Number),
];

const COSMETICS_RULES: &[FieldRule] = &[
    rule("ownedThemes", FieldKind::TextSet),
    rule("ownedSprites", FieldKind::TextSet),
    rule("activeTheme", FieldKind::Text),
    rule("activeSprite", FieldKind::Text),
];

const PLAYER_RULES: &[FieldRule] = &[
    rule("level", int(1, U32)),
    rule("experience", int(0, U64)),
    rule("experienceToNextLevel", int(1, U64)),
    rule("currency", int(0, U64)),
    rule("stats", FieldKind::Record(STATS_RULES)),
    rule("skillPoints", int(0, U32)),
    rule("cosmetics", FieldKind::Record(COSMETICS_RULES)),
];

const IDLE_RULES: &[FieldRule] = &[
    rule("lastCollectionTime", FieldKind::OptionalTimestamp),
    rule("accumulatedUnits", int(0, U64)),
    rule("fractionalUnits", FieldKind::Number),
];

const PROGRESSION_RULES: &[FieldRule] = &[
    rule("currentBossIndex", int(0, U32)),
    rule("currentBossResolve", int(0, U64)),
    rule("defeatedBosses", FieldKind::IntegerSet { max: U32 }),
    rule("idleState", FieldKind::Record(IDLE_RULES)),
];

const SETTINGS_RULES: &[FieldRule] = &[
    rule(
        "sessionDurationMinutes",
        int(MIN_SESSION_MINUTES as u64, MAX_SESSION_MINUTES as u64),
    ),
    rule(
        "breakDurationMinutes",
        int(MIN_BREAK_MINUTES as u64, MAX_BREAK_MINUTES as u64),
    ),
    rule("autoStartBreak", FieldKind::Bool),
    rule("autoCompleteTaskDefault", FieldKind::Bool),
    rule("notificationsEnabled", FieldKind::Bool),
    rule("soundEnabled", FieldKind::Bool),
    rule("strictMode", FieldKind::Bool),
    rule("syncCosmetics", FieldKind::Bool),
];

const STATISTICS_RULES: &[FieldRule] = &[
    rule("totalSessions", int(0, U64)),
    rule("completedSessions", int(0, U64)),
    rule("compromisedSessions", int(0, U64)),
    rule("abandonedSessions", int(0, U64)),
    rule("totalFocusSeconds", int(0, U64)),
    rule("totalIdleSeconds", int(0, U64)),
    rule("longestSessionMinutes", int(0, U32)),
    rule("currentStreakDays", int(0, U32)),
    rule("longestStreakDays", int(0, U32)),
    rule("lastSessionDay", FieldKind::OptionalDate),
    rule("bossesDefeated", int(0, U64)),
    rule("criticalHits", int(0, U64)),
    rule("totalCurrencyEarned", int(0, U64)),
    rule("idleUnitsCollected", int(0, U64)),
    rule("breaksCompleted", int(0, U64)),
    rule("breaksSkipped", int(0, U64)),
];

const SESSION_RULES: &[FieldRule] = &[
    rule(
        "durationMinutes",
        int(MIN_SESSION_MINUTES as u64, MAX_SESSION_MINUTES as u64),
    ),
    rule("taskRef", FieldKind::OptionalText),
    rule("autoCompleteTask", FieldKind::Bool),
    rule("isActive", FieldKind::Bool),
    rule("isPaused", FieldKind::Bool),
    rule("isCompromised", FieldKind::Bool),
    rule("idleSeconds", int(0, U64)),
    rule("pausedAt", FieldKind::OptionalTimestamp),
    rule("compromiseReason", FieldKind::OptionalText),
];

const BREAK_RULES: &[FieldRule] = &[
    rule(
        "durationMinutes",
        int(MIN_BREAK_MINUTES as u64, MAX_BREAK_MINUTES as u64),
    ),
    rule("isActive", FieldKind::Bool),
];

// ─────────────────────────────────────────────────────────────────────────────
// Field checks
// ─────────────────────────────────────────────────────────────────────────────

enum Verdict {
    Keep,
    Coerce(Value),
    Default,
}

fn check(kind: FieldKind, value: &Value, default: Option<&Value>) -> Verdict {
    match kind {
        FieldKind::Integer { min, max } => check_integer(value, min, max),
        FieldKind::Number => verdict(value.is_number()),
        FieldKind::Bool => verdict(value.is_boolean()),
        FieldKind::Text => verdict(value.is_string()),
        FieldKind::OptionalText => verdict(value.is_null() || value.is_string()),
        FieldKind::Timestamp => check_integer(value, 0, MAX_TIMESTAMP_MS),
        FieldKind::OptionalTimestamp if value.is_null() => Verdict::Keep,
        FieldKind::OptionalTimestamp => check_integer(value, 0, MAX_TIMESTAMP_MS),
        FieldKind::OptionalDate => match value {
            Value::Null => Verdict::Keep,
            Value::String(s) => verdict(NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
            _ => Verdict::Default,
        },
        FieldKind::TextSet => match value {
            Value::Array(items) if items.iter().all(Value::is_string) => Verdict::Keep,
            Value::Array(items) => Verdict::Coerce(Value::Array(
                items.iter().filter(|v| v.is_string()).cloned().collect(),
            )),
            _ => Verdict::Default,
        },
        FieldKind::IntegerSet { max } => match value {
            Value::Array(items) => {
                let valid: Vec<Value> = items
                    .iter()
                    .filter(|v| v.as_u64().map(|n| n <= max).unwrap_or(false))
                    .cloned()
                    .collect();
                if valid.len() == items.len() {
                    Verdict::Keep
                } else {
                    Verdict::Coerce(Value::Array(valid))
                }
            }
            _ => Verdict::Default,
        },
        FieldKind::Record(rules) => match value {
            Value::Object(map) => {
                let empty = Map::new();
                let defaults = default.and_then(Value::as_object).unwrap_or(&empty);
                let repaired = repair_record(map, rules, defaults);
                if repaired.repaired {
                    Verdict::Coerce(Value::Object(repaired.value))
                } else {
                    Verdict::Keep
                }
            }
            _ => Verdict::Default,
        },
    }
}

impl FieldKind {
    fn is_optional(&self) -> bool {
        matches!(
            self,
            FieldKind::OptionalText | FieldKind::OptionalTimestamp | FieldKind::OptionalDate
        )
    }
}

fn verdict(ok: bool) -> Verdict {
    if ok {
        Verdict::Keep
    } else {
        Verdict::Default
    }
}

fn check_integer(value: &Value, min: u64, max: u64) -> Verdict {
    if let Some(n) = value.as_u64() {
        return verdict(n >= min && n <= max);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 => {
            let floored = f.floor();
            if floored >= min as f64 && floored <= max as f64 {
                Verdict::Coerce(Value::from(floored as u64))
            } else {
                Verdict::Default
            }
        }
        _ => Verdict::Default,
    }
}

/// Repairs one record against its rules, filling from `defaults`.
pub fn repair_record(
    raw: &Map<String, Value>,
    rules: &[FieldRule],
    defaults: &Map<String, Value>,
) -> Repaired<Map<String, Value>> {
    let mut record = raw.clone();
    let mut repaired = false;

    for rule in rules {
        let default = defaults.get(rule.key);
        let replacement = match record.get(rule.key) {
            // Absent optionals deserialize to None already.
            None if rule.kind.is_optional() => None,
            None => Some(default.cloned().unwrap_or(Value::Null)),
            Some(value) => match check(rule.kind, value, default) {
                Verdict::Keep => None,
                Verdict::Coerce(value) => Some(value),
                Verdict::Default => Some(default.cloned().unwrap_or(Value::Null)),
            },
        };
        if let Some(value) = replacement {
            tracing::debug!(field = rule.key, "Repairing field");
            record.insert(rule.key.to_string(), value);
            repaired = true;
        }
    }

    Repaired { value: record, repaired }
}

/// Repairs a top-level section; a non-object section becomes its defaults.
pub fn repair_section(
    raw: Option<&Value>,
    rules: &[FieldRule],
    defaults: Map<String, Value>,
) -> Repaired<Map<String, Value>> {
    match raw {
        Some(Value::Object(map)) => repair_record(map, rules, &defaults),
        _ => Repaired::changed(defaults),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Document
// ─────────────────────────────────────────────────────────────────────────────

/// Why a document could not be repaired field-by-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Healthy(Map<String, Value>),
    Repaired {
        document: Map<String, Value>,
        sections: Vec<&'static str>,
    },
    Corrupt(Corruption),
}

/// Returns the reason a document must be reset, if any.
pub fn critical_corruption(raw: &Value) -> Option<Corruption> {
    let Some(doc) = raw.as_object() else {
        return Some(Corruption {
            reason: "document is not an object".to_string(),
        });
    };

    let well_formed = CORE_SECTIONS
        .iter()
        .filter(|section| doc.get(**section).map(Value::is_object).unwrap_or(false))
        .count();
    if well_formed < 2 {
        return Some(Corruption {
            reason: format!("only {} of 4 core sections are records", well_formed),
        });
    }

    let player = doc.get("player");
    let level_is_number = player
        .and_then(|p| p.get("level"))
        .map(Value::is_number)
        .unwrap_or(false);
    if !level_is_number {
        return Some(Corruption {
            reason: "player.level is not numeric".to_string(),
        });
    }

    let stats_is_record = player
        .and_then(|p| p.get("stats"))
        .map(Value::is_object)
        .unwrap_or(false);
    if !stats_is_record {
        return Some(Corruption {
            reason: "player.stats is not a record".to_string(),
        });
    }

    None
}

/// Validates a migrated document and repairs it field by field.
pub fn validate_document(raw: &Value) -> Validation {
    if let Some(corruption) = critical_corruption(raw) {
        return Validation::Corrupt(corruption);
    }
    let Some(doc) = raw.as_object() else {
        return Validation::Corrupt(Corruption {
            reason: "document is not an object".to_string(),
        });
    };

    let mut document = doc.clone();
    let mut sections = Vec::new();

    let core: [(&'static str, &[FieldRule], Value); 4] = [
        ("player", PLAYER_RULES, to_default(Player::default())),
        (
            "progression",
            PROGRESSION_RULES,
            to_default(Progression::default()),
        ),
        ("settings", SETTINGS_RULES, to_default(Settings::default())),
        (
            "statistics",
            STATISTICS_RULES,
            to_default(Statistics::default()),
        ),
    ];
    for (name, rules, defaults) in core {
        let defaults = match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let section = repair_section(doc.get(name), rules, defaults);
        if section.repaired {
            sections.push(name);
        }
        document.insert(name.to_string(), Value::Object(section.value));
    }

    if repair_cosmetic_ownership(&mut document) && !sections.contains(&"player") {
        sections.push("player");
    }

    let session = repair_timed_record(
        doc.get("session"),
        SESSION_RULES,
        json!({
            "durationMinutes": 25,
            "taskRef": null,
            "autoCompleteTask": false,
            "isActive": false,
            "isPaused": false,
            "isCompromised": false,
            "idleSeconds": 0,
            "pausedAt": null,
            "compromiseReason": null,
        }),
    );
    let break_state = repair_timed_record(
        doc.get("break"),
        BREAK_RULES,
        json!({"durationMinutes": 5, "isActive": false}),
    );

    let mut session = session;
    let mut break_state = break_state;
    if let Value::Object(record) = &mut session.value {
        if repair_pause_fields(record) {
            session.repaired = true;
        }
    }
    if session.value.is_object() && break_state.value.is_object() {
        tracing::warn!("Document has both an active session and an active break; dropping break");
        break_state = Repaired::changed(Value::Null);
    }
    if session.repaired {
        sections.push("session");
    }
    if break_state.repaired {
        sections.push("break");
    }
    document.insert("session".to_string(), session.value);
    document.insert("break".to_string(), break_state.value);

    let tasks = repair_tasks(doc.get("tasks"));
    if tasks.repaired {
        sections.push("tasks");
    }
    document.insert("tasks".to_string(), tasks.value);

    if sections.is_empty() {
        Validation::Healthy(document)
    } else {
        Validation::Repaired { document, sections }
    }
}

fn to_default<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Session and break records. Inactive or unrecoverable records become null.
fn repair_timed_record(raw: Option<&Value>, rules: &[FieldRule], defaults: Value) -> Repaired<Value> {
    let record = match raw {
        None => return Repaired::changed(Value::Null),
        Some(Value::Null) => return Repaired::kept(Value::Null),
        Some(Value::Object(record)) => record,
        Some(_) => return Repaired::changed(Value::Null),
    };

    // Without a start time the deadline is unknowable.
    let start_ok = record
        .get("startTime")
        .map(|v| matches!(check(FieldKind::Timestamp, v, None), Verdict::Keep))
        .unwrap_or(false);
    if !start_ok {
        tracing::warn!("Timed record has no usable startTime; discarding");
        return Repaired::changed(Value::Null);
    }

    let defaults = match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let repaired = repair_record(record, rules, &defaults);
    let is_active = repaired
        .value
        .get("isActive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_active {
        return Repaired::changed(Value::Null);
    }

    Repaired {
        value: Value::Object(repaired.value),
        repaired: repaired.repaired,
    }
}

/// `isPaused` implies `isActive`; a resumed session carries no `pausedAt`.
fn repair_pause_fields(record: &mut Map<String, Value>) -> bool {
    let is_active = record.get("isActive").and_then(Value::as_bool) == Some(true);
    let is_paused = record.get("isPaused").and_then(Value::as_bool) == Some(true);
    let has_paused_at = record.get("pausedAt").map(|v| !v.is_null()).unwrap_or(false);

    if is_paused && !is_active {
        record.insert("isPaused".to_string(), Value::Bool(false));
        record.insert("pausedAt".to_string(), Value::Null);
        return true;
    }
    if !is_paused && has_paused_at {
        record.insert("pausedAt".to_string(), Value::Null);
        return true;
    }
    false
}

/// The active theme/sprite must be owned; otherwise fall back to the default.
fn repair_cosmetic_ownership(document: &mut Map<String, Value>) -> bool {
    let Some(cosmetics) = document
        .get_mut("player")
        .and_then(|p| p.get_mut("cosmetics"))
        .and_then(Value::as_object_mut)
    else {
        return false;
    };

    let mut repaired = false;
    for (owned_key, active_key, fallback) in [
        ("ownedThemes", "activeTheme", DEFAULT_THEME),
        ("ownedSprites", "activeSprite", DEFAULT_SPRITE),
    ] {
        let active = cosmetics
            .get(active_key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string();
        let owned = cosmetics
            .get(owned_key)
            .and_then(Value::as_array)
            .map(|items| items.iter().any(|v| v.as_str() == Some(active.as_str())))
            .unwrap_or(false);
        if owned {
            continue;
        }

        repaired = true;
        cosmetics.insert(active_key.to_string(), Value::from(fallback));
        let has_fallback = cosmetics
            .get(owned_key)
            .and_then(Value::as_array)
            .map(|items| items.iter().any(|v| v.as_str() == Some(fallback)))
            .unwrap_or(false);
        if !has_fallback {
            if let Some(Value::Array(items)) = cosmetics.get_mut(owned_key) {
                items.push(Value::from(fallback));
            }
        }
    }
    repaired
}

fn repair_tasks(raw: Option<&Value>) -> Repaired<Value> {
    match raw {
        Some(Value::Array(goals)) => {
            let valid: Vec<Value> = goals
                .iter()
                .filter(|goal| serde_json::from_value::<Goal>((*goal).clone()).is_ok())
                .cloned()
                .collect();
            if valid.len() == goals.len() {
                Repaired::kept(Value::Array(valid))
            } else {
                Repaired::changed(Value::Array(valid))
            }
        }
        _ => Repaired::changed(Value::Array(Vec::new())),
    }
}
