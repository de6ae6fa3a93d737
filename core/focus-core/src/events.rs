//! Events published to UI and notification collaborators.
//!
//! Delivery is fire-and-forget: a sink with no listener simply drops events,
//! and a failing sink never affects the operation that produced the event.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::Serialize;

use crate::reconcile::Reward;
use crate::session::SessionResult;
use crate::types::{BreakState, SessionState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FocusEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted { session: SessionState },
    #[serde(rename_all = "camelCase")]
    SessionEnded {
        result: SessionResult,
        reward: Reward,
        leveled_up: bool,
        boss_defeated: bool,
        retroactive: bool,
        delay_minutes: u64,
    },
    #[serde(rename_all = "camelCase")]
    SessionPaused { session: SessionState },
    #[serde(rename_all = "camelCase")]
    SessionResumed {
        idle_seconds_added: u64,
        session: SessionState,
    },
    #[serde(rename_all = "camelCase")]
    SessionCompromised { reason: String },
    #[serde(rename_all = "camelCase")]
    SessionAbandoned { active_seconds: u64 },
    #[serde(rename_all = "camelCase")]
    BreakStarted {
        break_state: BreakState,
        remaining_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    BreakEnded {
        retroactive: bool,
        delay_minutes: u64,
        skipped: bool,
        preempted: bool,
    },
    #[serde(rename_all = "camelCase")]
    IdleUnitsCollected {
        units: u64,
        currency_gained: u64,
        accumulated_units: u64,
    },
    #[serde(rename_all = "camelCase")]
    StorageFailed { operation: String, message: String },
    #[serde(rename_all = "camelCase")]
    StateReset { reason: String, backup_saved: bool },
}

impl FocusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FocusEvent::SessionStarted { .. } => "SESSION_STARTED",
            FocusEvent::SessionEnded { .. } => "SESSION_ENDED",
            FocusEvent::SessionPaused { .. } => "SESSION_PAUSED",
            FocusEvent::SessionResumed { .. } => "SESSION_RESUMED",
            FocusEvent::SessionCompromised { .. } => "SESSION_COMPROMISED",
            FocusEvent::SessionAbandoned { .. } => "SESSION_ABANDONED",
            FocusEvent::BreakStarted { .. } => "BREAK_STARTED",
            FocusEvent::BreakEnded { .. } => "BREAK_ENDED",
            FocusEvent::IdleUnitsCollected { .. } => "IDLE_UNITS_COLLECTED",
            FocusEvent::StorageFailed { .. } => "STORAGE_FAILED",
            FocusEvent::StateReset { .. } => "STATE_RESET",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: FocusEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FocusEvent) {}
}

/// Logs each event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: FocusEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), payload = %payload, "Focus event"),
            Err(_) => tracing::info!(event = event.name(), "Focus event"),
        }
    }
}

/// Forwards events into an mpsc channel; a dropped receiver is ignored.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Mutex<Sender<FocusEvent>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<FocusEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: FocusEvent) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(event);
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<FocusEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FocusEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(FocusEvent::name).collect()
    }

    pub fn take(&self) -> Vec<FocusEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: FocusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn events_serialize_with_screaming_tag() {
        let event = FocusEvent::BreakEnded {
            retroactive: true,
            delay_minutes: 2,
            skipped: false,
            preempted: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "BREAK_ENDED");
        assert_eq!(value["delayMinutes"], 2);
        assert_eq!(event.name(), "BREAK_ENDED");
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.emit(FocusEvent::SessionCompromised {
            reason: "blocked site".to_string(),
        });
        assert_eq!(rx.recv().unwrap().name(), "SESSION_COMPROMISED");
        drop(rx);
        sink.emit(FocusEvent::SessionCompromised {
            reason: "again".to_string(),
        });
    }

    #[test]
    fn memory_sink_take_drains() {
        let sink = MemorySink::new();
        sink.emit(FocusEvent::StorageFailed {
            operation: "save".to_string(),
            message: "disk full".to_string(),
        });
        assert_eq!(sink.names(), vec!["STORAGE_FAILED"]);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }
}
