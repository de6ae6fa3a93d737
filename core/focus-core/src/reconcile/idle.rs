//! Idle-unit accrual between collection ticks.
//!
//! Units accrue per whole tick period elapsed since `lastCollectionTime`.
//! Partial periods are not lost: the collection time only advances by the
//! periods actually consumed, so a late or missed tick catches up in full
//! on the next one. Partial units are not lost either: a fractional rate
//! leaves its remainder in `fractionalUnits` for the next collection.

use chrono::{DateTime, Duration, Utc};

use crate::config::{IdleConfig, TimerConfig};
use crate::types::IdleState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleEconomy {
    pub period: Duration,
    pub units_per_interval: f64,
    pub units_per_currency: u64,
}

impl Default for IdleEconomy {
    fn default() -> Self {
        Self::from_config(&IdleConfig::default(), &TimerConfig::default())
    }
}

impl IdleEconomy {
    pub fn from_config(idle: &IdleConfig, timers: &TimerConfig) -> Self {
        Self {
            period: Duration::seconds(timers.idle_tick_period_secs.max(1) as i64),
            units_per_interval: idle.units_per_interval.max(0.0),
            units_per_currency: idle.units_per_currency.max(1),
        }
    }

    pub fn period_std(&self) -> std::time::Duration {
        self.period
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdleCollection {
    pub next: IdleState,
    pub intervals: u64,
    pub units: u64,
    pub currency_gained: u64,
}

impl IdleCollection {
    fn unchanged(next: IdleState) -> Self {
        Self {
            next,
            intervals: 0,
            units: 0,
            currency_gained: 0,
        }
    }
}

/// Computes the collection due at `now`.
///
/// The first collection only records the start time. A clock that moved
/// backwards restarts accrual from `now`.
pub fn collect_idle(idle: &IdleState, economy: &IdleEconomy, now: DateTime<Utc>) -> IdleCollection {
    let mut next = idle.clone();

    let last = match idle.last_collection_time {
        Some(last) if last <= now => last,
        Some(last) => {
            tracing::warn!(
                last_collection = %last,
                now = %now,
                "Idle collection time is in the future; restarting accrual"
            );
            next.last_collection_time = Some(now);
            return IdleCollection::unchanged(next);
        }
        None => {
            next.last_collection_time = Some(now);
            return IdleCollection::unchanged(next);
        }
    };

    let period_ms = economy.period.num_milliseconds().max(1);
    let elapsed_ms = now.signed_duration_since(last).num_milliseconds().max(0);
    let intervals = elapsed_ms / period_ms;
    if intervals == 0 {
        return IdleCollection::unchanged(next);
    }

    let carried = if idle.fractional_units.is_finite() {
        idle.fractional_units.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let raw_units = intervals as f64 * economy.units_per_interval + carried;
    let (units, fraction) = if raw_units.is_finite() {
        let whole = raw_units.floor();
        (whole as u64, raw_units - whole)
    } else {
        (0, 0.0)
    };

    next.fractional_units = fraction;
    next.last_collection_time = Some(last + Duration::milliseconds(intervals * period_ms));
    let pool = next.accumulated_units.saturating_add(units);
    let currency_gained = pool / economy.units_per_currency;
    next.accumulated_units = pool % economy.units_per_currency;

    IdleCollection {
        next,
        intervals: intervals as u64,
        units,
        currency_gained,
    }
}
