//! Bounded retry with exponential backoff and jitter.
//!
//! Used inside worker phases for transient Reddit and provider failures.
//! A single exhausted retry never aborts a cycle; callers skip the
//! offending item and record a scrape error instead.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the initial try (0 = no retries)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Random jitter fraction applied to each delay (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let parse = |suffix: &str| -> Option<u64> {
            std::env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .and_then(|v| v.parse().ok())
        };

        let defaults = Self::default();
        Self {
            max_retries: parse("MAX_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.max_retries),
            initial_delay: parse("INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: parse("MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_factor: std::env::var(format!("{}_BACKOFF_FACTOR", prefix))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff_factor),
            jitter: defaults.jitter,
        }
    }

    /// Delay before retry `attempt` (1-indexed; attempt 0 is the initial try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_millis() as f64
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + (rand::random::<f64>() - 0.5) * 2.0 * spread
        } else {
            capped
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Whether an error is worth retrying at all.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        let text = format!("{:#}", self).to_lowercase();
        const TRANSIENT: &[&str] = &[
            "timeout",
            "timed out",
            "connection refused",
            "connection reset",
            "temporarily unavailable",
            "service unavailable",
            "too many requests",
            "rate limit",
            "500",
            "502",
            "503",
            "504",
            "429",
            "broken pipe",
        ];
        TRANSIENT.iter().any(|p| text.contains(p))
    }
}

/// Run `operation` with up to `policy.max_retries` retries on retryable
/// errors. Non-retryable errors fail immediately.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                attempt += 1;
                if !err.is_retryable() || attempt > policy.max_retries {
                    if err.is_retryable() {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "retries exhausted"
                        );
                    }
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn retryable_classification() {
        assert!(anyhow::anyhow!("request timed out after 30s").is_retryable());
        assert!(anyhow::anyhow!("HTTP 429 Too Many Requests").is_retryable());
        assert!(!anyhow::anyhow!("subreddit does not exist").is_retryable());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: 0.0,
        };

        let result: Result<u32, anyhow::Error> =
            retry_with_policy(&policy, "test_op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow::anyhow!("connection reset by peer"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), anyhow::Error> =
            retry_with_policy(&policy, "test_op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("invalid credentials"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
