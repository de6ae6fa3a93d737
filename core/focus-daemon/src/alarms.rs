//! Persisted alarm scheduler.
//!
//! Alarms live in SQLite so a daemon restart keeps them. Firing is polled:
//! the daemon asks for due alarms on an interval and delivers each one to the
//! reconciler. One-shot alarms are removed when taken; periodic alarms are
//! pushed forward by one period from the poll time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use focus_core::{Clock, Scheduler, SchedulerError, TimerKind, TimerSpec};
use tracing::{debug, warn};

use crate::db::{AlarmRow, Db};

pub struct AlarmScheduler {
    db: Arc<Db>,
    clock: Arc<dyn Clock>,
}

impl AlarmScheduler {
    pub fn new(db: Arc<Db>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Removes or reschedules every alarm due at `now` and returns their kinds
    /// in firing order.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<TimerKind>, String> {
        let now_ms = now.timestamp_millis();
        let mut due = Vec::new();

        for alarm in self.db.due_alarms(now_ms)? {
            let Some(kind) = TimerKind::from_str(&alarm.name) else {
                warn!(alarm = %alarm.name, "Dropping alarm with unknown name");
                self.db.delete_alarm(&alarm.name)?;
                continue;
            };

            match alarm.period_ms {
                Some(period_ms) if period_ms > 0 => {
                    let next = AlarmRow {
                        fire_at_ms: now_ms.saturating_add(period_ms),
                        ..alarm
                    };
                    self.db.upsert_alarm(&next, &now.to_rfc3339())?;
                }
                _ => {
                    self.db.delete_alarm(&alarm.name)?;
                }
            }
            due.push(kind);
        }

        Ok(due)
    }

    pub fn pending(&self, kind: TimerKind) -> Result<Option<DateTime<Utc>>, String> {
        Ok(self
            .db
            .get_alarm(kind.as_str())?
            .and_then(|alarm| DateTime::from_timestamp_millis(alarm.fire_at_ms)))
    }

    pub fn pending_count(&self) -> Result<usize, String> {
        self.db.count_alarms()
    }
}

impl Scheduler for AlarmScheduler {
    fn arm(&self, kind: TimerKind, spec: TimerSpec) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let (delay, period_ms) = match spec {
            TimerSpec::Once { delay } => (delay, None),
            TimerSpec::Periodic { period } => (period, Some(millis(period))),
        };
        let alarm = AlarmRow {
            name: kind.as_str().to_string(),
            fire_at_ms: now.timestamp_millis().saturating_add(millis(delay)),
            period_ms,
        };

        self.db
            .upsert_alarm(&alarm, &now.to_rfc3339())
            .map_err(|err| SchedulerError::new(kind.as_str(), err))?;
        debug!(
            timer = %kind,
            fire_at_ms = alarm.fire_at_ms,
            periodic = period_ms.is_some(),
            "Alarm armed"
        );
        Ok(())
    }

    fn cancel(&self, kind: TimerKind) -> Result<bool, SchedulerError> {
        self.db
            .delete_alarm(kind.as_str())
            .map_err(|err| SchedulerError::new(kind.as_str(), err))
    }
}

fn millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use focus_core::ManualClock;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn scheduler() -> (tempfile::TempDir, Arc<ManualClock>, AlarmScheduler) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("state.db")).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let scheduler = AlarmScheduler::new(db, clock.clone());
        (dir, clock, scheduler)
    }

    #[test]
    fn once_alarm_fires_once() {
        let (_dir, clock, scheduler) = scheduler();
        scheduler
            .arm(
                TimerKind::SessionEnd,
                TimerSpec::Once {
                    delay: StdDuration::from_secs(1500),
                },
            )
            .unwrap();

        assert!(scheduler.take_due(clock.now()).unwrap().is_empty());

        clock.advance(Duration::minutes(25));
        assert_eq!(
            scheduler.take_due(clock.now()).unwrap(),
            vec![TimerKind::SessionEnd]
        );
        assert!(scheduler.take_due(clock.now()).unwrap().is_empty());
        assert_eq!(scheduler.pending_count().unwrap(), 0);
    }

    #[test]
    fn periodic_alarm_reschedules_from_poll_time() {
        let (_dir, clock, scheduler) = scheduler();
        scheduler
            .arm(
                TimerKind::IdleCollectionTick,
                TimerSpec::Periodic {
                    period: StdDuration::from_secs(60),
                },
            )
            .unwrap();

        clock.advance(Duration::seconds(90));
        assert_eq!(
            scheduler.take_due(clock.now()).unwrap(),
            vec![TimerKind::IdleCollectionTick]
        );
        assert_eq!(
            scheduler.pending(TimerKind::IdleCollectionTick).unwrap(),
            Some(clock.now() + Duration::seconds(60))
        );
    }

    #[test]
    fn arming_replaces_and_cancel_reports_presence() {
        let (_dir, clock, scheduler) = scheduler();
        for secs in [60, 300] {
            scheduler
                .arm(
                    TimerKind::BreakEnd,
                    TimerSpec::Once {
                        delay: StdDuration::from_secs(secs),
                    },
                )
                .unwrap();
        }
        assert_eq!(
            scheduler.pending(TimerKind::BreakEnd).unwrap(),
            Some(clock.now() + Duration::seconds(300))
        );
        assert_eq!(scheduler.pending_count().unwrap(), 1);

        assert!(scheduler.cancel(TimerKind::BreakEnd).unwrap());
        assert!(!scheduler.cancel(TimerKind::BreakEnd).unwrap());
    }
}
