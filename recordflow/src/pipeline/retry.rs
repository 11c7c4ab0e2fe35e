//! Retry configuration with backoff and jitter.
//!
//! Used by the stage executor's `Retry` error-handling mode and by the
//! recovery system's network-retry strategy. Delays block only the retrying
//! task.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Retry behavior attached to a stage or recovery strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Maximum attempts, including the initial one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryStrategy {
    /// Creates a default strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let capped = match self.backoff {
            BackoffStrategy::Exponential => {
                #[allow(clippy::cast_possible_truncation)]
                let exp = base.saturating_mul(2u64.saturating_pow(attempt as u32));
                exp.min(self.max_delay_ms)
            }
            BackoffStrategy::Linear => base
                .saturating_mul(attempt as u64 + 1)
                .min(self.max_delay_ms),
            BackoffStrategy::Constant => base.min(self.max_delay_ms),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => {
                if capped == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=capped)
                }
            }
            JitterStrategy::Equal => {
                let half = capped / 2;
                if half == 0 {
                    capped
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Runs `operation` until it succeeds or the strategy is exhausted.
///
/// Sleeps between attempts with `tokio::time::sleep`, so only the calling
/// task is blocked.
pub async fn with_retry<T, E, F, Fut>(strategy: &RetryStrategy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= strategy.max_attempts {
                    return Err(e);
                }
                let delay = strategy.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exponential_delays() {
        let strategy = RetryStrategy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_delays() {
        let strategy = RetryStrategy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_capped() {
        let strategy = RetryStrategy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);

        assert_eq!(strategy.delay_for_attempt(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let strategy = RetryStrategy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);

        for _ in 0..20 {
            assert!(strategy.delay_for_attempt(0) <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let strategy = RetryStrategy::new()
            .with_max_attempts(5)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None);

        let mut calls = 0;
        let result: Result<i32, String> = with_retry(&strategy, || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(format!("attempt {n}"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhaustion() {
        let strategy = RetryStrategy::new()
            .with_max_attempts(2)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None);

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let result: Result<i32, String> = with_retry(&strategy, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err("always fails".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
