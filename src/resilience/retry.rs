// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Used by the Redis tier to reconnect after an outage. Every policy has a
//! finite attempt budget: a cache that cannot reach Redis keeps serving
//! from memory and reports itself degraded rather than retrying forever.
//!
//! ```text
//! attempt:   1      2      3      4      5 ...
//! sleep:     base   2×     4×     8×     ... capped at max_delay
//! ```
//!
//! # Example
//!
//! ```
//! use tiered_cache::RetryConfig;
//! use std::time::Duration;
//!
//! let policy = RetryConfig::reconnect(Duration::from_secs(1), Duration::from_secs(30), 10);
//! assert_eq!(policy.max_attempts, 10);
//! assert_eq!(policy.delay_after(1), Duration::from_secs(1));
//! assert_eq!(policy.delay_after(3), Duration::from_secs(4));
//! assert_eq!(policy.delay_after(9), Duration::from_secs(30));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Sleep after the first failure
    pub base_delay: Duration,
    /// Ceiling for any single sleep
    pub max_delay: Duration,
    /// Growth per failed attempt
    pub factor: f64,
    /// Attempts in total, including the first; at least 1
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reconnect(Duration::from_secs(1), Duration::from_secs(30), 10)
    }
}

impl RetryConfig {
    /// Doubling backoff from `base_delay`, capped at `max_delay`.
    ///
    /// `max_attempts` of zero is raised to one, and `max_delay` is never
    /// below `base_delay`.
    #[must_use]
    pub fn reconnect(base_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            factor: 2.0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Sleep that follows failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` attempts
/// have failed, returning the last error in that case.
pub async fn retry<F, Fut, T, E>(name: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = name, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if attempt >= config.max_attempts => {
                warn!(operation = name, attempt, error = %e, "Retry budget exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                debug!(
                    operation = name,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(attempts: usize) -> RetryConfig {
        RetryConfig::reconnect(Duration::from_millis(1), Duration::from_millis(4), attempts)
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let result: Result<u8, String> = retry("op", &fast(3), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u8, String> = retry("op", &fast(5), || {
            let counter = counter.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("refused".to_string()),
                    _ => Ok(1),
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u8, String> = retry("op", &fast(4), || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("refused #{n}")) }
        })
        .await;

        assert_eq!(result, Err("refused #4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_policy_is_never_unbounded() {
        let policy = RetryConfig::reconnect(Duration::from_secs(5), Duration::from_secs(1), 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let policy = RetryConfig::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.delay_after(10_000), Duration::from_secs(30));
    }
}
