//! The persisted game-state document.
//!
//! One `GameState` exists per user and is stored as a single JSON record with
//! camelCase keys. Timestamps are epoch milliseconds on disk.

use std::collections::BTreeSet;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Inclusive bounds for a focus session, in minutes.
pub const MIN_SESSION_MINUTES: u32 = 5;
pub const MAX_SESSION_MINUTES: u32 = 120;

/// Inclusive bounds for a break, in minutes.
pub const MIN_BREAK_MINUTES: u32 = 1;
pub const MAX_BREAK_MINUTES: u32 = 60;

pub const DEFAULT_THEME: &str = "default";
pub const DEFAULT_SPRITE: &str = "default";

// ─────────────────────────────────────────────────────────────────────────────
// Root Document
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub schema_version: u32,
    pub player: Player,
    pub session: Option<SessionState>,
    #[serde(rename = "break")]
    pub break_state: Option<BreakState>,
    pub progression: Progression,
    #[serde(default)]
    pub tasks: Vec<Goal>,
    pub settings: Settings,
    pub statistics: Statistics,
    /// Unknown top-level keys, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GameState {
    fn default() -> Self {
        GameState {
            schema_version: CURRENT_SCHEMA_VERSION,
            player: Player::default(),
            session: None,
            break_state: None,
            progression: Progression::default(),
            tasks: Vec::new(),
            settings: Settings::default(),
            statistics: Statistics::default(),
            extra: Map::new(),
        }
    }
}

impl GameState {
    pub fn with_schema_version(schema_version: u32) -> Self {
        GameState {
            schema_version,
            ..GameState::default()
        }
    }

    pub fn active_session(&self) -> Option<&SessionState> {
        self.session.as_ref().filter(|s| s.is_active)
    }

    pub fn active_break(&self) -> Option<&BreakState> {
        self.break_state.as_ref().filter(|b| b.is_active)
    }

    /// Marks the goal, task, or subtask with `id` complete. Returns whether
    /// anything matched.
    pub fn complete_task(&mut self, id: &str) -> bool {
        for goal in &mut self.tasks {
            if goal.id == id {
                goal.completed = true;
                return true;
            }
            for task in &mut goal.tasks {
                if task.id == id {
                    task.completed = true;
                    return true;
                }
                if let Some(subtask) = task.subtasks.iter_mut().find(|s| s.id == id) {
                    subtask.completed = true;
                    return true;
                }
            }
        }
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Player
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub level: u32,
    pub experience: u64,
    pub experience_to_next_level: u64,
    pub currency: u64,
    pub stats: StatVector,
    pub skill_points: u32,
    pub cosmetics: Cosmetics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Player {
    fn default() -> Self {
        Player {
            level: 1,
            experience: 0,
            experience_to_next_level: 100,
            currency: 0,
            stats: StatVector::default(),
            skill_points: 0,
            cosmetics: Cosmetics::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatVector {
    #[serde(serialize_with = "whole_as_integer")]
    pub spirit: f64,
    #[serde(serialize_with = "whole_as_integer")]
    pub harmony: f64,
    #[serde(serialize_with = "whole_as_integer")]
    pub soulflow: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StatVector {
    fn default() -> Self {
        StatVector {
            spirit: 1.0,
            harmony: 1.0,
            soulflow: 1.0,
            extra: Map::new(),
        }
    }
}

/// Whole-number stats are written as JSON integers so a stored `2` stays `2`.
fn whole_as_integer<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < EXACT_LIMIT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cosmetics {
    pub owned_themes: BTreeSet<String>,
    pub owned_sprites: BTreeSet<String>,
    pub active_theme: String,
    pub active_sprite: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Cosmetics {
    fn default() -> Self {
        Cosmetics {
            owned_themes: BTreeSet::from([DEFAULT_THEME.to_string()]),
            owned_sprites: BTreeSet::from([DEFAULT_SPRITE.to_string()]),
            active_theme: DEFAULT_THEME.to_string(),
            active_sprite: DEFAULT_SPRITE.to_string(),
            extra: Map::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session / Break
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(with = "ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub task_ref: Option<String>,
    #[serde(default)]
    pub auto_complete_task: bool,
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub is_compromised: bool,
    #[serde(default)]
    pub idle_seconds: u64,
    #[serde(
        default,
        with = "ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compromise_reason: Option<String>,
}

impl SessionState {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn planned_seconds(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }

    /// Seconds of focused time as of `at` (elapsed minus accumulated idle).
    pub fn active_seconds_at(&self, at: DateTime<Utc>) -> u64 {
        let elapsed = at.signed_duration_since(self.start_time).num_seconds().max(0) as u64;
        elapsed.saturating_sub(self.idle_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakState {
    #[serde(with = "ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub is_active: bool,
}

impl BreakState {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Progression
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub current_boss_index: u32,
    pub current_boss_resolve: u64,
    pub defeated_bosses: BTreeSet<u32>,
    pub idle_state: IdleState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Progression {
    fn default() -> Self {
        Progression {
            current_boss_index: 0,
            current_boss_resolve: 100,
            defeated_bosses: BTreeSet::new(),
            idle_state: IdleState::default(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleState {
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_collection_time: Option<DateTime<Utc>>,
    pub accumulated_units: u64,
    /// Part of a unit earned but not yet whole, in `0.0..1.0`.
    #[serde(default, serialize_with = "whole_as_integer")]
    pub fractional_units: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks (goal → task → subtask)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub subtasks: Vec<Subtask>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub completed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings / Statistics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub session_duration_minutes: u32,
    pub break_duration_minutes: u32,
    pub auto_start_break: bool,
    pub auto_complete_task_default: bool,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
    pub strict_mode: bool,
    pub sync_cosmetics: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            session_duration_minutes: 25,
            break_duration_minutes: 5,
            auto_start_break: true,
            auto_complete_task_default: false,
            notifications_enabled: true,
            sound_enabled: true,
            strict_mode: false,
            sync_cosmetics: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub compromised_sessions: u64,
    pub abandoned_sessions: u64,
    pub total_focus_seconds: u64,
    pub total_idle_seconds: u64,
    pub longest_session_minutes: u32,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    pub last_session_day: Option<NaiveDate>,
    pub bosses_defeated: u64,
    pub critical_hits: u64,
    pub total_currency_earned: u64,
    pub idle_units_collected: u64,
    pub breaks_completed: u64,
    pub breaks_skipped: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statistics {
    /// Advances the daily streak for a session finished on `day`.
    pub fn record_session_day(&mut self, day: NaiveDate) {
        match self.last_session_day {
            Some(last) if last == day => {}
            Some(last) if last.succ_opt() == Some(day) => self.current_streak_days += 1,
            // A day earlier than the last recorded one keeps the streak as-is.
            Some(last) if day < last => return,
            _ => self.current_streak_days = 1,
        }
        self.longest_streak_days = self.longest_streak_days.max(self.current_streak_days);
        self.last_session_day = Some(day);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 9, minute, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[test]
    fn default_document_serializes_with_camel_case_keys() {
        let value = serde_json::to_value(GameState::default()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert!(object["break"].is_null());
        assert!(object["session"].is_null());
        assert_eq!(object["player"]["experienceToNextLevel"], 100);
        assert_eq!(object["settings"]["breakDurationMinutes"], 5);
    }

    #[test]
    fn session_timestamps_are_epoch_millis() {
        let session = SessionState {
            start_time: at(0),
            duration_minutes: 25,
            task_ref: None,
            auto_complete_task: false,
            is_active: true,
            is_paused: false,
            is_compromised: false,
            idle_seconds: 0,
            paused_at: None,
            compromise_reason: None,
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["startTime"], at(0).timestamp_millis());
        assert!(value.get("pausedAt").is_none());
        assert_eq!(session.deadline(), at(25));
    }

    #[test]
    fn active_seconds_subtracts_idle_and_never_underflows() {
        let mut session = SessionState {
            start_time: at(0),
            duration_minutes: 25,
            task_ref: None,
            auto_complete_task: false,
            is_active: true,
            is_paused: false,
            is_compromised: false,
            idle_seconds: 120,
            paused_at: None,
            compromise_reason: None,
        };
        assert_eq!(session.active_seconds_at(at(10)), 480);
        session.idle_seconds = 10_000;
        assert_eq!(session.active_seconds_at(at(10)), 0);
    }

    #[test]
    fn unknown_top_level_keys_survive_round_trip() {
        let mut value = serde_json::to_value(GameState::default()).unwrap();
        value["uiLayout"] = serde_json::json!({"compact": true});
        let state: GameState = serde_json::from_value(value).unwrap();
        assert_eq!(state.extra["uiLayout"]["compact"], true);
        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back["uiLayout"]["compact"], true);
    }

    #[test]
    fn nested_unknown_keys_and_whole_stats_survive_round_trip() {
        let mut value = serde_json::to_value(GameState::default()).unwrap();
        value["player"]["stats"]["spirit"] = serde_json::json!(2);
        value["player"]["stats"]["harmony"] = serde_json::json!(0.5);
        value["player"]["nickname"] = serde_json::json!("ansel");
        value["settings"]["blockedSites"] = serde_json::json!(["x.com"]);

        let state: GameState = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(state.player.stats.spirit, 2.0);
        assert_eq!(state.player.extra["nickname"], "ansel");
        assert_eq!(serde_json::to_value(&state).unwrap(), value);
    }

    #[test]
    fn complete_task_finds_nested_subtask() {
        let mut state = GameState::default();
        state.tasks.push(Goal {
            id: "goal-1".to_string(),
            title: "Ship".to_string(),
            completed: false,
            tasks: vec![Task {
                id: "task-1".to_string(),
                title: "Write".to_string(),
                completed: false,
                subtasks: vec![Subtask {
                    id: "sub-1".to_string(),
                    title: "Outline".to_string(),
                    completed: false,
                    ..Subtask::default()
                }],
                ..Task::default()
            }],
            ..Goal::default()
        });
        assert!(state.complete_task("sub-1"));
        assert!(state.tasks[0].tasks[0].subtasks[0].completed);
        assert!(!state.tasks[0].tasks[0].completed);
        assert!(!state.complete_task("missing"));
    }

    #[test]
    fn streak_counts_consecutive_days() {
        let mut stats = Statistics::default();
        stats.record_session_day(day(1));
        stats.record_session_day(day(1));
        stats.record_session_day(day(2));
        stats.record_session_day(day(3));
        assert_eq!(stats.current_streak_days, 3);
        stats.record_session_day(day(5));
        assert_eq!(stats.current_streak_days, 1);
        assert_eq!(stats.longest_streak_days, 3);
        assert_eq!(stats.last_session_day, Some(day(5)));
    }
}
