//! A single backoff policy for every retryable collaborator call.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::RetrySettings;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Fixed,
    Fibonacci,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread each delay by up to ±10%.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            strategy: settings.strategy,
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }

    /// A policy that never waits. Useful in tests.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (0 = the wait after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Exponential => base_ms * 2f64.powi(retry.min(32) as i32),
            BackoffStrategy::Linear => base_ms * f64::from(retry + 1),
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Fibonacci => base_ms * fibonacci(retry + 1) as f64,
        };
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = if self.jitter && capped_ms > 0.0 {
            let spread = rand::rng().random_range(-0.1..=0.1);
            (capped_ms * (1.0 + spread)).max(0.0)
        } else {
            capped_ms
        };
        Duration::from_millis(jittered_ms.round() as u64)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget runs out. Sleeps the calling thread between attempts.
    pub fn retry<T, E, F, R>(&self, mut op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < attempts && is_retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, "Giving up");
                    return Err(err);
                }
            }
        }
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n.min(90) {
        (a, b) = (b, a.saturating_add(b));
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> BackoffPolicy {
        BackoffPolicy {
            strategy,
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_linear_fixed_fibonacci() {
        assert_eq!(policy(BackoffStrategy::Linear).delay_for(2), Duration::from_millis(300));
        assert_eq!(policy(BackoffStrategy::Fixed).delay_for(7), Duration::from_millis(100));
        let fib = policy(BackoffStrategy::Fibonacci);
        let delays: Vec<u128> = (0..5).map(|n| fib.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 100, 200, 300, 500]);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let p = BackoffPolicy { jitter: true, ..policy(BackoffStrategy::Fixed) };
        for _ in 0..50 {
            let ms = p.delay_for(0).as_millis();
            assert!((90..=110).contains(&ms), "{ms}");
        }
    }

    #[test]
    fn test_retry_until_success() {
        let p = BackoffPolicy::immediate(3);
        let result: Result<u32, String> =
            p.retry(|n| if n < 2 { Err("flaky".into()) } else { Ok(n) }, |_| true);
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn test_permanent_error_short_circuits() {
        let p = BackoffPolicy::immediate(5);
        let mut calls = 0;
        let result: Result<(), String> = p.retry(
            |_| {
                calls += 1;
                Err("video unavailable".into())
            },
            |e: &String| !e.contains("unavailable"),
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_attempt_budget_is_respected() {
        let p = BackoffPolicy::immediate(3);
        let mut calls = 0;
        let _: Result<(), String> = p.retry(
            |_| {
                calls += 1;
                Err("timeout".into())
            },
            |_| true,
        );
        assert_eq!(calls, 3);
    }
}
