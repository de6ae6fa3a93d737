//! Arms wall-clock timers for session and break expiry and reconciles them
//! against persisted deadlines.
//!
//! # Timer state machine
//!
//! ```text
//!          arm                 callback at/after deadline
//!   Idle ───────► Armed ───────────────────────────────► Fired ──┐
//!                   │                                             ├──► Closed
//!                   └── resume finds deadline passed ─► MissedOnResume
//! ```
//!
//! An active record still open more than the late-callback tolerance past its
//! deadline is closed retroactively by the next idle tick or
//! [`ScheduleReconciler::settle_overdue`] call, so a lost or failed one-shot
//! callback cannot leave it open.
//!
//! All closing paths converge on the same transition and use the deadline
//! (never "now") as the effective end, so a session closed late earns exactly
//! what an on-time close would. Each path re-checks that the record is still
//! active before closing; a second close is logged and absorbed.
//!
//! All mutating operations take one mutex around the store and timer phases,
//! and every mutation is read-modify-write against the store's latest copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::contracts::{
    ProgressionManager, Reward, RewardCalculator, StandardProgression, StandardRewards,
};
use super::idle::{collect_idle, IdleEconomy};
use super::scheduler::{Scheduler, TimerKind, TimerSpec};
use crate::clock::{Clock, SystemClock};
use crate::config::FocusConfig;
use crate::error::{FocusError, Result};
use crate::events::{EventSink, FocusEvent, NullSink};
use crate::session::{self, SessionResult};
use crate::store::{with_retry, Backup, RetryPolicy, StateStore};
use crate::types::{BreakState, GameState, SessionState, Statistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    Idle,
    Armed,
    Fired,
    MissedOnResume,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerOptions {
    pub retry: RetryPolicy,
    /// Callbacks later than this past the deadline are reported as retroactive.
    pub late_callback_tolerance: Duration,
    pub idle: IdleEconomy,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from_config(&FocusConfig::default())
    }
}

impl ReconcilerOptions {
    pub fn from_config(config: &FocusConfig) -> Self {
        Self {
            retry: config.retry.policy(),
            late_callback_tolerance: Duration::seconds(
                config.timers.late_callback_tolerance_secs as i64,
            ),
            idle: IdleEconomy::from_config(&config.idle, &config.timers),
        }
    }
}

/// Parameters for starting a session. Unset fields fall back to settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub duration_minutes: Option<u32>,
    pub task_ref: Option<String>,
    pub auto_complete_task: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClose {
    pub result: SessionResult,
    pub reward: Reward,
    pub leveled_up: bool,
    pub boss_defeated: bool,
    pub retroactive: bool,
    pub delay_minutes: u64,
    pub break_started: Option<BreakState>,
    pub break_closed_immediately: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakClose {
    pub retroactive: bool,
    pub delay_minutes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleCollected {
    pub units: u64,
    pub currency_gained: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    SessionClosed(Box<SessionClose>),
    BreakClosed(BreakClose),
    IdleCollected(IdleCollected),
    /// Callback arrived before the deadline; re-armed for the remainder.
    Rearmed {
        kind: TimerKind,
        remaining_seconds: u64,
    },
    AlreadyClosed(TimerKind),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReport {
    pub session_closed: Option<SessionClose>,
    pub break_closed: Option<BreakClose>,
    pub idle: IdleCollected,
    pub rearmed: Vec<TimerKind>,
}

enum BreakPlan {
    None,
    Arm {
        state: BreakState,
        remaining: Duration,
    },
    ClosedImmediately {
        delay_minutes: u64,
    },
}

struct Inner {
    store: StateStore,
    phases: HashMap<TimerKind, TimerPhase>,
}

pub struct ScheduleReconciler {
    inner: Mutex<Inner>,
    scheduler: Arc<dyn Scheduler>,
    rewards: Box<dyn RewardCalculator>,
    progression: Box<dyn ProgressionManager>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    options: ReconcilerOptions,
}

impl ScheduleReconciler {
    pub fn new(store: StateStore, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                phases: HashMap::new(),
            }),
            scheduler,
            rewards: Box::new(StandardRewards::default()),
            progression: Box::new(StandardProgression::default()),
            clock: Arc::new(SystemClock),
            events: Arc::new(NullSink),
            options: ReconcilerOptions::default(),
        }
    }

    pub fn with_rewards(mut self, rewards: impl RewardCalculator + 'static) -> Self {
        self.rewards = Box::new(rewards);
        self
    }

    pub fn with_progression(mut self, progression: impl ProgressionManager + 'static) -> Self {
        self.progression = Box::new(progression);
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

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    // ═════════════════════════════════════════════════════════════════════
    // Queries
    // ═════════════════════════════════════════════════════════════════════

    pub fn snapshot(&self) -> Result<GameState> {
        self.lock().store.snapshot()
    }

    pub fn timer_phase(&self, kind: TimerKind) -> TimerPhase {
        self.lock()
            .phases
            .get(&kind)
            .copied()
            .unwrap_or(TimerPhase::Idle)
    }

    pub fn get_backup(&self) -> Result<Option<Backup>> {
        self.lock().store.get_backup()
    }

    pub fn delete_backup(&self) -> Result<()> {
        self.lock().store.delete_backup()
    }

    // ═════════════════════════════════════════════════════════════════════
    // User Operations
    // ═════════════════════════════════════════════════════════════════════

    /// Starts a session, preempting any active break, and arms `sessionEnd`.
    pub fn start_session(&self, request: StartRequest) -> Result<SessionState> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let now = self.clock.now();

        let started = session::start_session(
            request
                .duration_minutes
                .unwrap_or(state.settings.session_duration_minutes),
            request.task_ref,
            request
                .auto_complete_task
                .unwrap_or(state.settings.auto_complete_task_default),
            state.session.as_ref(),
            now,
        )?;

        let mut next = state.clone();
        let preempted = next.active_break().is_some();
        next.break_state = None;
        next.session = Some(started.clone());
        inner.store.save(&next)?;

        if preempted {
            self.cancel_timer(&mut inner, TimerKind::BreakEnd);
            self.transition(&mut inner, TimerKind::BreakEnd, TimerPhase::Closed);
            self.events.emit(FocusEvent::BreakEnded {
                retroactive: false,
                delay_minutes: 0,
                skipped: false,
                preempted: true,
            });
        }

        tracing::info!(
            duration_minutes = started.duration_minutes,
            task_ref = ?started.task_ref,
            deadline = %started.deadline(),
            "Session started"
        );
        self.arm_once(&mut inner, TimerKind::SessionEnd, started.deadline() - now);
        self.events.emit(FocusEvent::SessionStarted {
            session: started.clone(),
        });
        Ok(started)
    }

    pub fn pause_session(&self) -> Result<SessionState> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let paused = session::pause_session(state.session.as_ref(), self.clock.now())?;

        let mut next = state;
        next.session = Some(paused.clone());
        inner.store.save(&next)?;

        tracing::info!("Session paused");
        self.events.emit(FocusEvent::SessionPaused {
            session: paused.clone(),
        });
        Ok(paused)
    }

    /// Resumes a paused session. Without an observed idle figure the paused
    /// interval is charged as idle.
    pub fn resume_session(&self, idle_seconds_observed: Option<u64>) -> Result<SessionState> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let before = state.session.clone();
        let resumed =
            session::resume_session(before.as_ref(), idle_seconds_observed, self.clock.now())?;

        let mut next = state;
        next.session = Some(resumed.clone());
        inner.store.save(&next)?;

        let previous_idle = before.as_ref().map(|s| s.idle_seconds).unwrap_or(0);
        let newly_compromised =
            resumed.is_compromised && !before.map(|s| s.is_compromised).unwrap_or(false);

        tracing::info!(
            idle_seconds = resumed.idle_seconds,
            compromised = resumed.is_compromised,
            "Session resumed"
        );
        self.events.emit(FocusEvent::SessionResumed {
            idle_seconds_added: resumed.idle_seconds.saturating_sub(previous_idle),
            session: resumed.clone(),
        });
        if newly_compromised {
            self.events.emit(FocusEvent::SessionCompromised {
                reason: resumed.compromise_reason.clone().unwrap_or_default(),
            });
        }
        Ok(resumed)
    }

    pub fn mark_compromised(&self, reason: &str) -> Result<SessionState> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let was_compromised = state
            .active_session()
            .map(|s| s.is_compromised)
            .unwrap_or(false);
        let compromised = session::mark_compromised(state.session.as_ref(), reason)?;

        let mut next = state;
        next.session = Some(compromised.clone());
        inner.store.save(&next)?;

        if !was_compromised {
            tracing::info!(reason, "Session compromised");
            self.events.emit(FocusEvent::SessionCompromised {
                reason: reason.to_string(),
            });
        }
        Ok(compromised)
    }

    /// Gives up on the active session: no reward, no break.
    pub fn abandon_session(&self) -> Result<u64> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let Some(active) = state.active_session().cloned() else {
            return Err(FocusError::NotActive("session"));
        };

        let now = self.clock.now();
        let active_seconds = session::end_session(Some(&active), now.min(active.deadline()))?
            .active_seconds;

        let mut next = state;
        next.session = None;
        next.statistics.abandoned_sessions += 1;
        inner.store.save(&next)?;

        self.cancel_timer(&mut inner, TimerKind::SessionEnd);
        self.transition(&mut inner, TimerKind::SessionEnd, TimerPhase::Closed);
        tracing::info!(active_seconds, "Session abandoned");
        self.events
            .emit(FocusEvent::SessionAbandoned { active_seconds });
        Ok(active_seconds)
    }

    pub fn skip_break(&self) -> Result<()> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let mut next = state.clone();
        next.break_state = session::end_break(state.break_state.as_ref())?;
        next.statistics.breaks_skipped += 1;
        inner.store.save(&next)?;

        self.cancel_timer(&mut inner, TimerKind::BreakEnd);
        self.transition(&mut inner, TimerKind::BreakEnd, TimerPhase::Closed);
        tracing::info!("Break skipped");
        self.events.emit(FocusEvent::BreakEnded {
            retroactive: false,
            delay_minutes: 0,
            skipped: true,
            preempted: false,
        });
        Ok(())
    }

    // ═════════════════════════════════════════════════════════════════════
    // Timer Delivery
    // ═════════════════════════════════════════════════════════════════════

    /// Handles a scheduler callback.
    pub fn on_timer_fired(&self, kind: TimerKind) -> Result<FireOutcome> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let now = self.clock.now();

        match kind {
            TimerKind::SessionEnd => {
                let Some(active) = state.active_session() else {
                    return Ok(self.already_closed(&mut inner, kind));
                };
                let deadline = active.deadline();
                if now < deadline {
                    return Ok(self.rearm_early(&mut inner, kind, deadline - now));
                }

                self.transition(&mut inner, kind, TimerPhase::Fired);
                let lateness = now - deadline;
                let close = self.close_session(
                    &mut inner,
                    &state,
                    deadline,
                    now,
                    lateness > self.options.late_callback_tolerance,
                )?;
                Ok(FireOutcome::SessionClosed(Box::new(close)))
            }
            TimerKind::BreakEnd => {
                let Some(active) = state.active_break() else {
                    return Ok(self.already_closed(&mut inner, kind));
                };
                let deadline = active.deadline();
                if now < deadline {
                    return Ok(self.rearm_early(&mut inner, kind, deadline - now));
                }

                self.transition(&mut inner, kind, TimerPhase::Fired);
                let lateness = now - deadline;
                let close = self.close_break(
                    &mut inner,
                    &state,
                    lateness,
                    lateness > self.options.late_callback_tolerance,
                )?;
                Ok(FireOutcome::BreakClosed(close))
            }
            TimerKind::IdleCollectionTick => {
                let state = if self.close_overdue(&mut inner, &state, now)? {
                    inner.store.snapshot()?
                } else {
                    state
                };
                let collected = self.collect_idle_units(&mut inner, &state, now)?;
                Ok(FireOutcome::IdleCollected(collected))
            }
        }
    }

    /// Closes an active session or break that outlived its deadline by more
    /// than the late-callback tolerance. Returns whether anything closed.
    pub fn settle_overdue(&self) -> Result<bool> {
        let mut inner = self.lock();
        let state = inner.store.snapshot()?;
        let now = self.clock.now();
        self.close_overdue(&mut inner, &state, now)
    }

    /// Re-reads the store and settles every deadline that passed while the
    /// process was suspended, then re-arms whatever is still pending.
    pub fn reconcile_on_resume(&self) -> Result<ResumeReport> {
        let mut inner = self.lock();
        let state = inner.store.load()?;
        let now = self.clock.now();
        let mut report = ResumeReport::default();

        if let Some(active) = state.active_session() {
            let deadline = active.deadline();
            if now > deadline {
                let lateness = now - deadline;
                tracing::warn!(
                    deadline = %deadline,
                    late_minutes = lateness.num_minutes(),
                    "Session deadline passed while suspended; closing retroactively"
                );
                self.transition(&mut inner, TimerKind::SessionEnd, TimerPhase::MissedOnResume);
                let close = self.close_session(&mut inner, &state, deadline, now, true)?;
                if close.break_started.is_some() {
                    report.rearmed.push(TimerKind::BreakEnd);
                }
                report.session_closed = Some(close);
            } else if self.arm_once(&mut inner, TimerKind::SessionEnd, deadline - now) {
                report.rearmed.push(TimerKind::SessionEnd);
            }
        } else if let Some(active) = state.active_break() {
            let deadline = active.deadline();
            if now > deadline {
                let lateness = now - deadline;
                tracing::warn!(
                    deadline = %deadline,
                    late_minutes = lateness.num_minutes(),
                    "Break deadline passed while suspended; closing retroactively"
                );
                self.transition(&mut inner, TimerKind::BreakEnd, TimerPhase::MissedOnResume);
                report.break_closed = Some(self.close_break(&mut inner, &state, lateness, true)?);
            } else if self.arm_once(&mut inner, TimerKind::BreakEnd, deadline - now) {
                report.rearmed.push(TimerKind::BreakEnd);
            }
        }

        let latest = inner.store.snapshot()?;
        report.idle = self.collect_idle_units(&mut inner, &latest, now)?;
        let period = self.options.idle.period_std();
        if self.arm(
            &mut inner,
            TimerKind::IdleCollectionTick,
            TimerSpec::Periodic { period },
        ) {
            report.rearmed.push(TimerKind::IdleCollectionTick);
        }

        Ok(report)
    }

    // ═════════════════════════════════════════════════════════════════════
    // Closing Transitions
    // ═════════════════════════════════════════════════════════════════════

    fn close_overdue(
        &self,
        inner: &mut Inner,
        state: &GameState,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let tolerance = self.options.late_callback_tolerance;
        if let Some(active) = state.active_session() {
            let deadline = active.deadline();
            if now - deadline <= tolerance {
                return Ok(false);
            }
            tracing::warn!(
                deadline = %deadline,
                late_minutes = (now - deadline).num_minutes(),
                "Session outlived its deadline without a callback; closing retroactively"
            );
            self.transition(inner, TimerKind::SessionEnd, TimerPhase::Fired);
            self.close_session(inner, state, deadline, now, true)?;
            return Ok(true);
        }
        if let Some(active) = state.active_break() {
            let lateness = now - active.deadline();
            if lateness <= tolerance {
                return Ok(false);
            }
            tracing::warn!(
                late_minutes = lateness.num_minutes(),
                "Break outlived its deadline without a callback; closing retroactively"
            );
            self.transition(inner, TimerKind::BreakEnd, TimerPhase::Fired);
            self.close_break(inner, state, lateness, true)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn close_session(
        &self,
        inner: &mut Inner,
        state: &GameState,
        effective_end: DateTime<Utc>,
        now: DateTime<Utc>,
        retroactive: bool,
    ) -> Result<SessionClose> {
        let Some(active) = state.active_session().cloned() else {
            return Err(FocusError::NotActive("session"));
        };
        let result = session::end_session(Some(&active), effective_end)?;
        let reward = self.rewards.calculate(&result, &state.player.stats);
        let delay_minutes = whole_minutes(now - active.deadline());

        let mut next = state.clone();
        next.session = None;

        let experience = self
            .progression
            .add_experience(reward.secondary_currency, &next.player);
        let player = &mut next.player;
        player.currency = player.currency.saturating_add(reward.primary_currency);
        player.level = experience.new_level;
        player.experience = experience.experience;
        player.experience_to_next_level = experience.experience_to_next_level;
        player.skill_points = player
            .skill_points
            .saturating_add(experience.skill_points_granted);

        let boss = self.progression.damage_boss(
            reward.boss_damage,
            &next.progression,
            next.player.level,
        );
        next.progression.current_boss_resolve = boss.remaining_resolve;
        if boss.was_defeated {
            let defeated = next.progression.current_boss_index;
            next.progression.defeated_bosses.insert(defeated);
            if let Some(spawn) = boss.next_boss {
                next.progression.current_boss_index = spawn.index;
                next.progression.current_boss_resolve = spawn.resolve;
            }
            tracing::info!(boss = defeated, "Boss defeated");
        }

        record_session(&mut next.statistics, &result, &reward, boss.was_defeated);
        next.statistics
            .record_session_day(effective_end.date_naive());

        if active.auto_complete_task {
            if let Some(task_ref) = active.task_ref.as_deref() {
                if !next.complete_task(task_ref) {
                    tracing::debug!(task_ref, "Auto-complete target not found");
                }
            }
        }

        let plan = self.plan_break(&mut next, effective_end, now);
        inner.store.save(&next)?;
        if let Err(err) = self.scheduler.cancel(TimerKind::SessionEnd) {
            tracing::warn!(error = %err, "Failed to clear sessionEnd timer");
        }
        self.transition(inner, TimerKind::SessionEnd, TimerPhase::Closed);

        tracing::info!(
            active_seconds = result.active_seconds,
            idle_seconds = result.idle_seconds,
            compromised = result.is_compromised,
            retroactive,
            delay_minutes,
            "Session closed"
        );
        self.events.emit(FocusEvent::SessionEnded {
            result: result.clone(),
            reward,
            leveled_up: experience.leveled_up,
            boss_defeated: boss.was_defeated,
            retroactive,
            delay_minutes,
        });

        let mut close = SessionClose {
            result,
            reward,
            leveled_up: experience.leveled_up,
            boss_defeated: boss.was_defeated,
            retroactive,
            delay_minutes,
            break_started: None,
            break_closed_immediately: false,
        };

        match plan {
            BreakPlan::None => {}
            BreakPlan::Arm { state, remaining } => {
                self.events.emit(FocusEvent::BreakStarted {
                    break_state: state.clone(),
                    remaining_seconds: remaining.num_seconds().max(0) as u64,
                });
                self.arm_once(inner, TimerKind::BreakEnd, remaining);
                close.break_started = Some(state);
            }
            BreakPlan::ClosedImmediately { delay_minutes } => {
                tracing::info!(delay_minutes, "Break elapsed while suspended; closed immediately");
                self.transition(inner, TimerKind::BreakEnd, TimerPhase::Closed);
                self.events.emit(FocusEvent::BreakEnded {
                    retroactive: true,
                    delay_minutes,
                    skipped: false,
                    preempted: false,
                });
                close.break_closed_immediately = true;
            }
        }

        Ok(close)
    }

    /// Starts the follow-up break at the session's effective end. A break
    /// whose whole duration already elapsed is counted but never stored.
    fn plan_break(
        &self,
        next: &mut GameState,
        effective_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BreakPlan {
        if !next.settings.auto_start_break {
            return BreakPlan::None;
        }
        let started = match session::start_break(next.settings.break_duration_minutes, effective_end)
        {
            Ok(started) => started,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping break with invalid duration");
                return BreakPlan::None;
            }
        };

        let remaining = started.deadline() - now;
        if remaining <= Duration::zero() {
            next.statistics.breaks_completed += 1;
            return BreakPlan::ClosedImmediately {
                delay_minutes: whole_minutes(now - started.deadline()),
            };
        }

        next.break_state = Some(started.clone());
        BreakPlan::Arm {
            state: started,
            remaining,
        }
    }

    fn close_break(
        &self,
        inner: &mut Inner,
        state: &GameState,
        lateness: Duration,
        retroactive: bool,
    ) -> Result<BreakClose> {
        let mut next = state.clone();
        next.break_state = session::end_break(state.break_state.as_ref())?;
        next.statistics.breaks_completed += 1;
        inner.store.save(&next)?;

        if let Err(err) = self.scheduler.cancel(TimerKind::BreakEnd) {
            tracing::warn!(error = %err, "Failed to clear breakEnd timer");
        }
        self.transition(inner, TimerKind::BreakEnd, TimerPhase::Closed);

        let close = BreakClose {
            retroactive,
            delay_minutes: whole_minutes(lateness),
        };
        tracing::info!(
            retroactive,
            delay_minutes = close.delay_minutes,
            "Break closed"
        );
        self.events.emit(FocusEvent::BreakEnded {
            retroactive,
            delay_minutes: close.delay_minutes,
            skipped: false,
            preempted: false,
        });
        Ok(close)
    }

    fn collect_idle_units(
        &self,
        inner: &mut Inner,
        state: &GameState,
        now: DateTime<Utc>,
    ) -> Result<IdleCollected> {
        let collection = collect_idle(&state.progression.idle_state, &self.options.idle, now);
        if collection.next == state.progression.idle_state {
            return Ok(IdleCollected::default());
        }

        let mut next = state.clone();
        next.progression.idle_state = collection.next.clone();
        next.player.currency = next
            .player
            .currency
            .saturating_add(collection.currency_gained);
        next.statistics.idle_units_collected += collection.units;
        next.statistics.total_currency_earned += collection.currency_gained;
        inner.store.save(&next)?;

        if collection.units > 0 {
            tracing::debug!(
                units = collection.units,
                currency = collection.currency_gained,
                "Idle units collected"
            );
            self.events.emit(FocusEvent::IdleUnitsCollected {
                units: collection.units,
                currency_gained: collection.currency_gained,
                accumulated_units: collection.next.accumulated_units,
            });
        }

        Ok(IdleCollected {
            units: collection.units,
            currency_gained: collection.currency_gained,
        })
    }

    // ═════════════════════════════════════════════════════════════════════
    // Timer Plumbing
    // ═════════════════════════════════════════════════════════════════════

    fn already_closed(&self, inner: &mut Inner, kind: TimerKind) -> FireOutcome {
        tracing::warn!(timer = %kind, "Timer fired for a record that is already closed; ignoring");
        self.transition(inner, kind, TimerPhase::Closed);
        FireOutcome::AlreadyClosed(kind)
    }

    fn rearm_early(&self, inner: &mut Inner, kind: TimerKind, remaining: Duration) -> FireOutcome {
        tracing::info!(
            timer = %kind,
            remaining_seconds = remaining.num_seconds(),
            "Timer fired before its deadline; re-arming"
        );
        self.arm_once(inner, kind, remaining);
        FireOutcome::Rearmed {
            kind,
            remaining_seconds: remaining.num_seconds().max(0) as u64,
        }
    }

    fn arm_once(&self, inner: &mut Inner, kind: TimerKind, delay: Duration) -> bool {
        let delay = delay.to_std().unwrap_or_default();
        self.arm(inner, kind, TimerSpec::Once { delay })
    }

    /// Clear-then-create registration. Failures are logged; the next resume
    /// reconciliation or overdue sweep covers the missing timer.
    fn arm(&self, inner: &mut Inner, kind: TimerKind, spec: TimerSpec) -> bool {
        let armed = with_retry(&self.options.retry, "arm timer", |_| {
            self.scheduler.cancel(kind)?;
            self.scheduler.arm(kind, spec)
        });
        match armed {
            Ok(()) => {
                self.transition(inner, kind, TimerPhase::Armed);
                true
            }
            Err(err) => {
                tracing::error!(
                    timer = %kind,
                    attempts = err.attempts,
                    error = %err.last,
                    "Failed to arm timer"
                );
                self.transition(inner, kind, TimerPhase::Idle);
                false
            }
        }
    }

    fn cancel_timer(&self, inner: &mut Inner, kind: TimerKind) {
        match self.scheduler.cancel(kind) {
            Ok(was_pending) => tracing::debug!(timer = %kind, was_pending, "Timer cancelled"),
            Err(err) => tracing::warn!(timer = %kind, error = %err, "Failed to cancel timer"),
        }
        self.transition(inner, kind, TimerPhase::Idle);
    }

    fn transition(&self, inner: &mut Inner, kind: TimerKind, to: TimerPhase) {
        let from = inner.phases.insert(kind, to).unwrap_or(TimerPhase::Idle);
        if from != to {
            tracing::debug!(timer = %kind, from = ?from, to = ?to, "Timer phase transition");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_session(
    statistics: &mut Statistics,
    result: &SessionResult,
    reward: &Reward,
    boss_defeated: bool,
) {
    statistics.total_sessions += 1;
    if result.is_compromised {
        statistics.compromised_sessions += 1;
    } else {
        statistics.completed_sessions += 1;
    }
    statistics.total_focus_seconds += result.active_seconds;
    statistics.total_idle_seconds += result.idle_seconds;
    let minutes = u32::try_from(result.active_seconds / 60).unwrap_or(u32::MAX);
    statistics.longest_session_minutes = statistics.longest_session_minutes.max(minutes);
    if boss_defeated {
        statistics.bosses_defeated += 1;
    }
    if reward.was_critical_hit {
        statistics.critical_hits += 1;
    }
    statistics.total_currency_earned += reward.primary_currency;
}

fn whole_minutes(duration: Duration) -> u64 {
    duration.num_minutes().max(0) as u64
}
