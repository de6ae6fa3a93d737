//! Bounded retry with exponential backoff for storage and scheduler calls.
//!
//! Every failed attempt waits `base_delay * 2^(attempt - 1)` before the next
//! attempt or before the failure is surfaced, so the default policy waits
//! 100ms, 200ms, 400ms across its three attempts. No call blocks longer than
//! the sum of that schedule plus the attempts themselves.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Same attempt budget, no waiting. Used by tests.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .collect()
    }
}

/// Final failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted.
///
/// `op` receives the 1-based attempt number.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation = label, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if attempt >= max_attempts {
                    return Err(RetryError {
                        attempts: attempt,
                        last: err,
                    });
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_100ms() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let mut seen = Vec::new();
        let result: Result<&str, RetryError<String>> =
            with_retry(&RetryPolicy::immediate(3), "test", |attempt| {
                seen.push(attempt);
                if attempt < 3 {
                    Err(format!("fail {}", attempt))
                } else {
                    Ok("ok")
                }
            });
        assert_eq!(result, Ok("ok"));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn surfaces_last_error_after_ceiling() {
        let mut calls = 0;
        let result: Result<(), RetryError<String>> =
            with_retry(&RetryPolicy::immediate(3), "test", |attempt| {
                calls += 1;
                Err(format!("fail {}", attempt))
            });
        assert_eq!(
            result,
            Err(RetryError {
                attempts: 3,
                last: "fail 3".to_string()
            })
        );
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_attempt_policy_still_tries_once() {
        let mut calls = 0;
        let _: Result<(), RetryError<String>> =
            with_retry(&RetryPolicy::immediate(0), "test", |_| {
                calls += 1;
                Err("nope".to_string())
            });
        assert_eq!(calls, 1);
    }
}
