//! Retry decisions with exponential backoff and jitter.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt number and the
//! error: only transient network errors are retried, a server-provided
//! rate-limit hint overrides the computed backoff, and the attempt count is
//! bounded per file.

use crate::config::NetworkConfig;
use crate::error::HubError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_RETRIES,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    RetryAfter(Duration),
    /// Surface the error.
    GiveUp,
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Factor in 0.5..1.5 keeps the mean delay and never approaches zero
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Decide what to do after attempt `attempt` (0-indexed) failed with `error`.
    pub fn decide(&self, attempt: u32, error: &HubError) -> RetryDecision {
        if !error.is_retryable() || attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = match error.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.calculate_delay(attempt),
        };
        RetryDecision::RetryAfter(delay)
    }
}

/// Retry an async operation according to `policy`.
///
/// Returns the final result and the number of attempts made.
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> (Result<T, HubError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HubError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} attempts", what, attempt + 1);
                }
                return (Ok(value), attempt + 1);
            }
            Err(e) => match policy.decide(attempt, &e) {
                RetryDecision::GiveUp => {
                    if e.is_retryable() {
                        warn!(
                            "All {} attempts for {} exhausted. Last error: {}",
                            policy.max_attempts, what, e
                        );
                    } else {
                        debug!("{} failed with non-retryable error: {}", what, e);
                    }
                    return (Err(e), attempt + 1);
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        policy.max_attempts,
                        what,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
