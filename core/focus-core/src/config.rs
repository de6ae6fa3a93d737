//! Runtime configuration loaded from `~/.focusquest/config.toml`.
//!
//! Every field has a serde default, so a partial file (or no file) yields a
//! working configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FocusError, Result};
use crate::store::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FocusConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timers: TimerConfig,
    #[serde(default)]
    pub idle: IdleConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.max(1),
            Duration::from_millis(self.base_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimerConfig {
    /// Callbacks later than this are reported as retroactive.
    #[serde(default = "default_late_callback_tolerance_secs")]
    pub late_callback_tolerance_secs: u64,
    #[serde(default = "default_idle_tick_period_secs")]
    pub idle_tick_period_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            late_callback_tolerance_secs: default_late_callback_tolerance_secs(),
            idle_tick_period_secs: default_idle_tick_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IdleConfig {
    /// Units accrued per full tick period.
    #[serde(default = "default_units_per_interval")]
    pub units_per_interval: f64,
    /// Units exchanged for one currency.
    #[serde(default = "default_units_per_currency")]
    pub units_per_currency: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            units_per_interval: default_units_per_interval(),
            units_per_currency: default_units_per_currency(),
        }
    }
}

/// Loads configuration, returning defaults if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<FocusConfig> {
    if !path.exists() {
        return Ok(FocusConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|err| FocusError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })?;
    let config: FocusConfig =
        toml::from_str(&content).map_err(|err| FocusError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;

    if config.idle.units_per_currency == 0 {
        return Err(FocusError::ConfigMalformed {
            path: path.to_path_buf(),
            details: "idle.units_per_currency must be at least 1".to_string(),
        });
    }
    if config.timers.idle_tick_period_secs == 0 {
        return Err(FocusError::ConfigMalformed {
            path: path.to_path_buf(),
            details: "timers.idle_tick_period_secs must be at least 1".to_string(),
        });
    }

    Ok(config)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_late_callback_tolerance_secs() -> u64 {
    60
}

fn default_idle_tick_period_secs() -> u64 {
    60
}

fn default_units_per_interval() -> f64 {
    1.0
}

fn default_units_per_currency() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let config = load_config(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, FocusConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[idle]\nunits_per_interval = 2.5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.idle.units_per_interval, 2.5);
        assert_eq!(config.idle.units_per_currency, 10);
        assert_eq!(config.timers, TimerConfig::default());
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[retry\nmax_attempts = ").unwrap();

        match load_config(&path) {
            Err(FocusError::ConfigMalformed { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ConfigMalformed, got {:?}", other),
        }
    }

    #[test]
    fn zero_exchange_rate_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[idle]\nunits_per_currency = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
