//! Pure transitions over the session and break records.
//!
//! Nothing here touches storage, timers, or the clock: callers pass `now`
//! in and persist whatever comes back. Every function takes the current
//! record by reference and returns a new one, so a rejected transition
//! leaves the caller's copy untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FocusError, Result};
use crate::types::{
    BreakState, SessionState, MAX_BREAK_MINUTES, MAX_SESSION_MINUTES, MIN_BREAK_MINUTES,
    MIN_SESSION_MINUTES,
};

/// Idle share of the planned duration above which a session is compromised.
pub const COMPROMISE_IDLE_RATIO: f64 = 0.25;

pub const IDLE_COMPROMISE_REASON: &str = "idle time exceeded 25% of the session";

/// Outcome of closing a session. Carries no reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub duration_minutes: u32,
    pub elapsed_seconds: u64,
    pub idle_seconds: u64,
    pub active_seconds: u64,
    pub is_compromised: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<String>,
}

pub fn start_session(
    duration_minutes: u32,
    task_ref: Option<String>,
    auto_complete_task: bool,
    current: Option<&SessionState>,
    now: DateTime<Utc>,
) -> Result<SessionState> {
    if current.map(|session| session.is_active).unwrap_or(false) {
        return Err(FocusError::Conflict(
            "a session is already active".to_string(),
        ));
    }
    if !(MIN_SESSION_MINUTES..=MAX_SESSION_MINUTES).contains(&duration_minutes) {
        return Err(FocusError::validation(
            "durationMinutes",
            format!(
                "{} is outside {}..={}",
                duration_minutes, MIN_SESSION_MINUTES, MAX_SESSION_MINUTES
            ),
        ));
    }

    Ok(SessionState {
        start_time: now,
        duration_minutes,
        task_ref: task_ref.filter(|task| !task.trim().is_empty()),
        auto_complete_task,
        is_active: true,
        is_paused: false,
        is_compromised: false,
        idle_seconds: 0,
        paused_at: None,
        compromise_reason: None,
    })
}

pub fn pause_session(current: Option<&SessionState>, now: DateTime<Utc>) -> Result<SessionState> {
    let session = require_active(current)?;
    if session.is_paused {
        return Err(FocusError::NotActive("unpaused session"));
    }

    let mut next = session.clone();
    next.is_paused = true;
    next.paused_at = Some(now);
    Ok(next)
}

/// Resumes a paused session, adding `idle_seconds_observed` (or the paused
/// interval when the caller has no better measure) to its idle time.
pub fn resume_session(
    current: Option<&SessionState>,
    idle_seconds_observed: Option<u64>,
    now: DateTime<Utc>,
) -> Result<SessionState> {
    let session = require_active(current)?;
    if !session.is_paused {
        return Err(FocusError::NotPaused);
    }

    let idle = idle_seconds_observed.unwrap_or_else(|| paused_interval(session, now));
    let mut next = session.clone();
    next.is_paused = false;
    next.paused_at = None;
    next.idle_seconds = next.idle_seconds.saturating_add(idle);
    apply_idle_rule(&mut next);
    Ok(next)
}

/// Latches the compromise flag. The first reason wins.
pub fn mark_compromised(current: Option<&SessionState>, reason: &str) -> Result<SessionState> {
    let session = require_active(current)?;
    let mut next = session.clone();
    if !next.is_compromised {
        next.is_compromised = true;
        next.compromise_reason = Some(reason.to_string());
    }
    Ok(next)
}

/// Closes a session as of `effective_end`. A session still paused at that
/// point is charged the paused interval as idle first.
pub fn end_session(
    current: Option<&SessionState>,
    effective_end: DateTime<Utc>,
) -> Result<SessionResult> {
    let session = require_active(current)?;

    let mut closing = session.clone();
    if closing.is_paused {
        let paused = paused_interval(&closing, effective_end);
        closing.idle_seconds = closing.idle_seconds.saturating_add(paused);
        apply_idle_rule(&mut closing);
    }

    let elapsed_seconds = effective_end
        .signed_duration_since(closing.start_time)
        .num_seconds()
        .max(0) as u64;

    Ok(SessionResult {
        duration_minutes: closing.duration_minutes,
        elapsed_seconds,
        idle_seconds: closing.idle_seconds,
        active_seconds: elapsed_seconds.saturating_sub(closing.idle_seconds),
        is_compromised: closing.is_compromised,
        task_ref: closing.task_ref,
    })
}

pub fn start_break(duration_minutes: u32, start_time: DateTime<Utc>) -> Result<BreakState> {
    if !(MIN_BREAK_MINUTES..=MAX_BREAK_MINUTES).contains(&duration_minutes) {
        return Err(FocusError::validation(
            "breakDurationMinutes",
            format!(
                "{} is outside {}..={}",
                duration_minutes, MIN_BREAK_MINUTES, MAX_BREAK_MINUTES
            ),
        ));
    }
    Ok(BreakState {
        start_time,
        duration_minutes,
        is_active: true,
    })
}

/// Destroys an active break. The returned record is always `None`.
pub fn end_break(current: Option<&BreakState>) -> Result<Option<BreakState>> {
    match current {
        Some(state) if state.is_active => Ok(None),
        _ => Err(FocusError::NotActive("break")),
    }
}

/// Idle seconds as a share of the planned duration.
pub fn idle_ratio(session: &SessionState) -> f64 {
    let planned = session.planned_seconds();
    if planned == 0 {
        return 0.0;
    }
    session.idle_seconds as f64 / planned as f64
}

fn require_active(current: Option<&SessionState>) -> Result<&SessionState> {
    current
        .filter(|session| session.is_active)
        .ok_or(FocusError::NotActive("session"))
}

fn paused_interval(session: &SessionState, at: DateTime<Utc>) -> u64 {
    session
        .paused_at
        .map(|paused_at| at.signed_duration_since(paused_at).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

fn apply_idle_rule(session: &mut SessionState) {
    if !session.is_compromised && idle_ratio(session) > COMPROMISE_IDLE_RATIO {
        session.is_compromised = true;
        session.compromise_reason = Some(IDLE_COMPROMISE_REASON.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn active(minutes: u32) -> SessionState {
        start_session(minutes, None, false, None, t0()).unwrap()
    }

    #[test]
    fn start_rejects_active_session() {
        let first = start_session(25, Some("task-1".into()), false, None, t0()).unwrap();
        assert!(first.is_active);
        assert_eq!(first.duration_minutes, 25);

        let err = start_session(10, Some("task-2".into()), false, Some(&first), t0()).unwrap_err();
        assert!(matches!(err, FocusError::Conflict(_)));
    }

    #[test]
    fn start_validates_duration_bounds() {
        assert!(start_session(5, None, false, None, t0()).is_ok());
        assert!(start_session(120, None, false, None, t0()).is_ok());
        for bad in [0, 4, 121] {
            let err = start_session(bad, None, false, None, t0()).unwrap_err();
            assert_eq!(err.code(), "validation_error");
        }
    }

    #[test]
    fn start_ignores_inactive_leftover() {
        let mut stale = active(25);
        stale.is_active = false;
        assert!(start_session(25, None, false, Some(&stale), t0()).is_ok());
    }

    #[test]
    fn pause_twice_is_rejected() {
        let paused = pause_session(Some(&active(25)), t0()).unwrap();
        assert!(paused.is_paused);
        assert_eq!(paused.paused_at, Some(t0()));
        assert!(matches!(
            pause_session(Some(&paused), t0()),
            Err(FocusError::NotActive(_))
        ));
        assert!(matches!(
            pause_session(None, t0()),
            Err(FocusError::NotActive("session"))
        ));
    }

    #[test]
    fn resume_requires_pause() {
        assert!(matches!(
            resume_session(Some(&active(25)), Some(10), t0()),
            Err(FocusError::NotPaused)
        ));
    }

    #[test]
    fn resume_at_threshold_stays_clean() {
        // 25 minutes planned: 375s idle is exactly 25%.
        let paused = pause_session(Some(&active(25)), t0()).unwrap();
        let resumed = resume_session(Some(&paused), Some(375), t0()).unwrap();
        assert!(!resumed.is_compromised);
        assert!(!resumed.is_paused);
        assert_eq!(resumed.paused_at, None);
    }

    #[test]
    fn resume_above_threshold_compromises_for_good() {
        let paused = pause_session(Some(&active(25)), t0()).unwrap();
        let resumed = resume_session(Some(&paused), Some(376), t0()).unwrap();
        assert!(resumed.is_compromised);
        assert_eq!(
            resumed.compromise_reason.as_deref(),
            Some(IDLE_COMPROMISE_REASON)
        );

        let paused = pause_session(Some(&resumed), t0()).unwrap();
        let again = resume_session(Some(&paused), Some(0), t0()).unwrap();
        assert!(again.is_compromised);
        assert_eq!(again.idle_seconds, 376);
    }

    #[test]
    fn resume_without_observation_uses_paused_interval() {
        let paused = pause_session(Some(&active(25)), t0() + Duration::minutes(2)).unwrap();
        let resumed = resume_session(Some(&paused), None, t0() + Duration::minutes(5)).unwrap();
        assert_eq!(resumed.idle_seconds, 180);
    }

    #[test]
    fn compromise_keeps_first_reason() {
        let once = mark_compromised(Some(&active(25)), "blocked site").unwrap();
        let twice = mark_compromised(Some(&once), "another").unwrap();
        assert_eq!(twice, once);
        assert_eq!(twice.compromise_reason.as_deref(), Some("blocked site"));
    }

    #[test]
    fn end_at_deadline_counts_full_duration() {
        let session = start_session(25, Some("task-1".into()), false, None, t0()).unwrap();
        let result = end_session(Some(&session), session.deadline()).unwrap();
        assert_eq!(result.active_seconds, 1500);
        assert_eq!(result.idle_seconds, 0);
        assert!(!result.is_compromised);
        assert_eq!(result.task_ref.as_deref(), Some("task-1"));
    }

    #[test]
    fn end_subtracts_idle() {
        let paused = pause_session(Some(&active(25)), t0()).unwrap();
        let resumed = resume_session(Some(&paused), Some(100), t0()).unwrap();
        let result = end_session(Some(&resumed), resumed.deadline()).unwrap();
        assert_eq!(result.elapsed_seconds, 1500);
        assert_eq!(result.active_seconds, 1400);
    }

    #[test]
    fn end_while_paused_charges_paused_interval() {
        let session = active(25);
        let paused = pause_session(Some(&session), t0() + Duration::minutes(10)).unwrap();
        let result = end_session(Some(&paused), session.deadline()).unwrap();
        assert_eq!(result.idle_seconds, 900);
        assert_eq!(result.active_seconds, 600);
        assert!(result.is_compromised);
    }

    #[test]
    fn end_before_start_clamps_to_zero() {
        let session = active(25);
        let result = end_session(Some(&session), t0() - Duration::minutes(1)).unwrap();
        assert_eq!(result.elapsed_seconds, 0);
        assert_eq!(result.active_seconds, 0);
    }

    #[test]
    fn breaks_validate_and_end() {
        assert!(start_break(0, t0()).is_err());
        assert!(start_break(61, t0()).is_err());
        let state = start_break(5, t0()).unwrap();
        assert_eq!(state.deadline(), t0() + Duration::minutes(5));
        assert_eq!(end_break(Some(&state)).unwrap(), None);
        assert!(end_break(None).is_err());
    }
}
