//! Daemon state: the reconciler plus the persisted alarm scheduler that
//! drives it.
//!
//! Socket handlers and the alarm thread share one `SharedState`. All game
//! state mutation goes through the reconciler, which serializes it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use focus_core::{
    Clock, EventSink, FireOutcome, FocusConfig, FocusError, LogSink, ReconcilerOptions,
    ResumeReport, ScheduleReconciler, StateStore, SystemClock, TimerKind, TimerPhase,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alarms::AlarmScheduler;
use crate::db::Db;
use crate::kv::SqliteKv;

/// A gap between alarm polls longer than this is treated as a host suspend.
pub const SUSPEND_GAP_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct TimerSnapshot {
    pub kind: TimerKind,
    pub phase: TimerPhase,
    pub fires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PollStats {
    pub polls: u64,
    pub fired: u64,
    pub suspend_recoveries: u64,
    pub overdue_closes: u64,
    pub failures: u64,
}

pub struct SharedState {
    reconciler: ScheduleReconciler,
    alarms: Arc<AlarmScheduler>,
    clock: Arc<dyn Clock>,
    last_poll: Mutex<Option<DateTime<Utc>>>,
    stats: Mutex<PollStats>,
}

impl SharedState {
    pub fn new(db: Db, config: &FocusConfig) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock), Arc::new(LogSink))
    }

    pub fn with_clock(
        db: Db,
        config: &FocusConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let db = Arc::new(db);
        let store = StateStore::new(SqliteKv::primary(Arc::clone(&db)))
            .with_synced(SqliteKv::synced(Arc::clone(&db)))
            .with_retry(config.retry.policy())
            .with_clock(Arc::clone(&clock))
            .with_events(Arc::clone(&events));
        let alarms = Arc::new(AlarmScheduler::new(db, Arc::clone(&clock)));
        let reconciler = ScheduleReconciler::new(store, alarms.clone())
            .with_clock(Arc::clone(&clock))
            .with_events(events)
            .with_options(ReconcilerOptions::from_config(config));

        Self {
            reconciler,
            alarms,
            clock,
            last_poll: Mutex::new(None),
            stats: Mutex::new(PollStats::default()),
        }
    }

    pub fn reconciler(&self) -> &ScheduleReconciler {
        &self.reconciler
    }

    /// Settles anything missed while the daemon was not running.
    pub fn reconcile_startup(&self) -> Result<ResumeReport, FocusError> {
        let report = self.reconciler.reconcile_on_resume()?;
        info!(
            session_closed = report.session_closed.is_some(),
            break_closed = report.break_closed.is_some(),
            idle_currency = report.idle.currency_gained,
            rearmed = ?report.rearmed,
            "Startup reconciliation complete"
        );
        Ok(report)
    }

    /// One tick of the alarm loop. Detects suspend gaps, delivers every due
    /// alarm to the reconciler, then closes any record left open past its
    /// deadline. Returns the number of callbacks delivered.
    pub fn poll_alarms(&self) -> usize {
        let now = self.clock.now();
        let suspended = self.note_poll(now);

        if suspended {
            warn!(gap_secs = SUSPEND_GAP_SECS, "Alarm poll gap detected; reconciling");
            self.bump(|stats| stats.suspend_recoveries += 1);
            if let Err(err) = self.reconciler.reconcile_on_resume() {
                warn!(error = %err, code = err.code(), "Resume reconciliation failed");
                self.bump(|stats| stats.failures += 1);
            }
        }

        let due = match self.alarms.take_due(now) {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "Failed to read due alarms");
                self.bump(|stats| stats.failures += 1);
                return 0;
            }
        };

        for kind in &due {
            match self.reconciler.on_timer_fired(*kind) {
                Ok(outcome) => log_outcome(*kind, &outcome),
                Err(err) => {
                    // The record stays active until the overdue sweep closes it.
                    warn!(timer = %kind, error = %err, code = err.code(), "Timer callback failed");
                    self.bump(|stats| stats.failures += 1);
                }
            }
        }

        match self.reconciler.settle_overdue() {
            Ok(true) => {
                info!("Closed a record whose alarm never settled it");
                self.bump(|stats| stats.overdue_closes += 1);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, code = err.code(), "Overdue sweep failed");
                self.bump(|stats| stats.failures += 1);
            }
        }

        let fired = due.len();
        self.bump(|stats| {
            stats.polls += 1;
            stats.fired += fired as u64;
        });
        fired
    }

    pub fn timers(&self) -> Vec<TimerSnapshot> {
        TimerKind::ALL
            .iter()
            .map(|kind| TimerSnapshot {
                kind: *kind,
                phase: self.reconciler.timer_phase(*kind),
                fires_at: self.alarms.pending(*kind).unwrap_or_else(|err| {
                    debug!(timer = %kind, error = %err, "Failed to read alarm");
                    None
                }),
            })
            .collect()
    }

    pub fn pending_alarms(&self) -> Option<usize> {
        self.alarms.pending_count().ok()
    }

    pub fn poll_stats(&self) -> PollStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note_poll(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_poll.lock().unwrap_or_else(PoisonError::into_inner);
        let suspended = matches!(*last, Some(previous) if now - previous > Duration::seconds(SUSPEND_GAP_SECS));
        *last = Some(now);
        suspended
    }

    fn bump(&self, update: impl FnOnce(&mut PollStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

fn log_outcome(kind: TimerKind, outcome: &FireOutcome) {
    match outcome {
        FireOutcome::SessionClosed(close) => info!(
            timer = %kind,
            retroactive = close.retroactive,
            delay_minutes = close.delay_minutes,
            currency = close.reward.primary_currency,
            compromised = close.result.is_compromised,
            "Session closed by alarm"
        ),
        FireOutcome::BreakClosed(close) => info!(
            timer = %kind,
            retroactive = close.retroactive,
            delay_minutes = close.delay_minutes,
            "Break closed by alarm"
        ),
        FireOutcome::IdleCollected(collected) => debug!(
            units = collected.units,
            currency_gained = collected.currency_gained,
            "Idle tick"
        ),
        FireOutcome::Rearmed {
            kind,
            remaining_seconds,
        } => debug!(timer = %kind, remaining_seconds, "Alarm fired early; re-armed"),
        FireOutcome::AlreadyClosed(kind) => {
            debug!(timer = %kind, "Alarm fired for a record that is already closed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use focus_core::{ManualClock, MemorySink, Scheduler, StartRequest};
    use tempfile::tempdir;

    struct Harness {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        events: Arc<MemorySink>,
        state: SharedState,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let db = Db::new(dir.path().join("daemon").join("state.db")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let events = Arc::new(MemorySink::new());
        let mut config = FocusConfig::default();
        config.retry.base_delay_ms = 0;
        let state = SharedState::with_clock(db, &config, clock.clone(), events.clone());
        Harness {
            _dir: dir,
            clock,
            events,
            state,
        }
    }

    #[test]
    fn session_alarm_closes_session_on_poll() {
        let h = harness();
        h.state.reconcile_startup().unwrap();
        h.state
            .reconciler()
            .start_session(StartRequest {
                duration_minutes: Some(25),
                ..StartRequest::default()
            })
            .unwrap();

        h.clock.advance(Duration::seconds(20));
        assert_eq!(h.state.poll_alarms(), 0);

        for _ in 0..(25 * 60 / 20) {
            h.clock.advance(Duration::seconds(20));
            h.state.poll_alarms();
        }

        let state = h.state.reconciler().snapshot().unwrap();
        assert!(state.session.is_none());
        assert_eq!(state.statistics.total_sessions, 1);
        assert!(h.events.names().contains(&"SESSION_ENDED"));
    }

    #[test]
    fn suspend_gap_closes_session_retroactively() {
        let h = harness();
        h.state.reconcile_startup().unwrap();
        h.state.poll_alarms();
        h.state
            .reconciler()
            .start_session(StartRequest {
                duration_minutes: Some(25),
                ..StartRequest::default()
            })
            .unwrap();

        h.clock.advance(Duration::minutes(40));
        h.state.poll_alarms();

        let stats = h.state.poll_stats();
        assert_eq!(stats.suspend_recoveries, 1);
        assert_eq!(stats.failures, 0);
        let state = h.state.reconciler().snapshot().unwrap();
        assert!(state.session.is_none());
        assert_eq!(state.statistics.total_sessions, 1);
        assert_eq!(
            h.events
                .names()
                .iter()
                .filter(|name| **name == "SESSION_ENDED")
                .count(),
            1
        );
    }

    #[test]
    fn lost_session_alarm_is_settled_by_poll() {
        let h = harness();
        h.state.reconcile_startup().unwrap();
        h.state.poll_alarms();
        h.state
            .reconciler()
            .start_session(StartRequest {
                duration_minutes: Some(25),
                ..StartRequest::default()
            })
            .unwrap();
        assert!(h.state.alarms.cancel(TimerKind::SessionEnd).unwrap());

        for _ in 0..(27 * 60 / 20) {
            h.clock.advance(Duration::seconds(20));
            h.state.poll_alarms();
        }

        let state = h.state.reconciler().snapshot().unwrap();
        assert!(state.session.is_none());
        assert_eq!(state.statistics.total_sessions, 1);
        assert_eq!(state.statistics.total_focus_seconds, 1500);
        let stats = h.state.poll_stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.suspend_recoveries, 0);
        assert!(h
            .state
            .reconciler()
            .start_session(StartRequest::default())
            .is_ok());
    }

    #[test]
    fn timers_report_pending_alarm_time() {
        let h = harness();
        h.state.reconcile_startup().unwrap();
        h.state
            .reconciler()
            .start_session(StartRequest {
                duration_minutes: Some(30),
                ..StartRequest::default()
            })
            .unwrap();

        let session_timer = h
            .state
            .timers()
            .into_iter()
            .find(|timer| timer.kind == TimerKind::SessionEnd)
            .unwrap();
        assert_eq!(session_timer.phase, TimerPhase::Armed);
        assert_eq!(
            session_timer.fires_at,
            Some(h.clock.now() + Duration::minutes(30))
        );
    }
}
