//! Delayed-callback scheduler seam.
//!
//! The scheduler owns persistence of pending timers and delivers callbacks
//! keyed by [`TimerKind`]. It makes no liveness promise: a callback can be
//! late, or never arrive if the host was suspended. At most one callback per
//! kind is in flight; arming a kind replaces whatever was pending for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerKind {
    SessionEnd,
    BreakEnd,
    IdleCollectionTick,
}

impl TimerKind {
    pub const ALL: [TimerKind; 3] = [
        TimerKind::SessionEnd,
        TimerKind::BreakEnd,
        TimerKind::IdleCollectionTick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::SessionEnd => "sessionEnd",
            TimerKind::BreakEnd => "breakEnd",
            TimerKind::IdleCollectionTick => "idleCollectionTick",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "sessionEnd" => Some(TimerKind::SessionEnd),
            "breakEnd" => Some(TimerKind::BreakEnd),
            "idleCollectionTick" => Some(TimerKind::IdleCollectionTick),
            _ => None,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSpec {
    Once { delay: Duration },
    Periodic { period: Duration },
}

pub trait Scheduler: Send + Sync {
    /// Registers a callback for `kind`, replacing any pending one.
    fn arm(&self, kind: TimerKind, spec: TimerSpec) -> Result<(), SchedulerError>;
    /// Clears the pending callback for `kind`; returns whether one existed.
    fn cancel(&self, kind: TimerKind) -> Result<bool, SchedulerError>;
}

/// In-process scheduler that never fires on its own. Callers inspect what
/// is pending and deliver callbacks themselves.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Mutex<HashMap<TimerKind, TimerSpec>>,
    history: Mutex<Vec<(TimerKind, TimerSpec)>>,
    failing_arms: AtomicU32,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` arm calls fail.
    pub fn fail_next_arms(&self, count: u32) {
        self.failing_arms.store(count, Ordering::SeqCst);
    }

    pub fn pending(&self, kind: TimerKind) -> Option<TimerSpec> {
        self.pending
            .lock()
            .ok()
            .and_then(|pending| pending.get(&kind).copied())
    }

    /// Every successful arm, oldest first.
    pub fn history(&self) -> Vec<(TimerKind, TimerSpec)> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Consumes a pending one-shot, as a delivery would. Periodic timers stay.
    pub fn take_due(&self, kind: TimerKind) -> Option<TimerSpec> {
        let mut pending = self.pending.lock().ok()?;
        match pending.get(&kind).copied() {
            Some(spec @ TimerSpec::Once { .. }) => {
                pending.remove(&kind);
                Some(spec)
            }
            other => other,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn arm(&self, kind: TimerKind, spec: TimerSpec) -> Result<(), SchedulerError> {
        let failing = self.failing_arms.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_arms.store(failing - 1, Ordering::SeqCst);
            return Err(SchedulerError::new(kind.as_str(), "alarm quota exceeded"));
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SchedulerError::new(kind.as_str(), "scheduler lock poisoned"))?;
        pending.insert(kind, spec);
        if let Ok(mut history) = self.history.lock() {
            history.push((kind, spec));
        }
        Ok(())
    }

    fn cancel(&self, kind: TimerKind) -> Result<bool, SchedulerError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SchedulerError::new(kind.as_str(), "scheduler lock poisoned"))?;
        Ok(pending.remove(&kind).is_some())
    }
}
