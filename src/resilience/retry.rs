//! Retry policy with exponential backoff for transient failures.

use crate::config::RetryConfig;
use crate::errors::AirtableError;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// What to do after a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the exchange again after the given delay.
    Retry(Duration),
    /// Return the error to the caller.
    GiveUp,
}

/// Retry policy for determining if a failed exchange should be retried.
pub trait RetryPolicy: Send + Sync {
    /// Decides what follows the failure of exchange number `attempt` (1-based).
    fn should_retry(&self, error: &AirtableError, attempt: u32) -> RetryDecision;

    /// Upper bound on exchanges for one logical request.
    fn max_attempts(&self) -> u32;
}

/// Default retry policy.
///
/// Retries transport failures, 429 and 5xx responses. A `Retry-After` hint
/// replaces the computed backoff, capped at `max_backoff`. Every other error
/// gives up at once.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryPolicy {
    config: RetryConfig,
}

impl DefaultRetryPolicy {
    /// Creates a policy from the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, error: &AirtableError, attempt: u32) -> RetryDecision {
        if attempt >= self.config.max_attempts || !error.is_retryable() {
            return RetryDecision::GiveUp;
        }

        let delay = match error.retry_after() {
            Some(hint) if hint > self.config.max_backoff => {
                warn!(
                    retry_after_ms = hint.as_millis() as u64,
                    max_backoff_ms = self.config.max_backoff.as_millis() as u64,
                    "Retry-After exceeds the maximum backoff, capping"
                );
                self.config.max_backoff
            }
            Some(hint) => hint,
            None => calculate_backoff(attempt, &self.config),
        };
        RetryDecision::Retry(delay)
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

/// Calculates backoff duration after failed attempt number `attempt`.
///
/// Never negative, even for a configuration that skipped validation.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_backoff.as_secs_f64();
    let exp = config.multiplier.powi(attempt.saturating_sub(1) as i32);
    let raw = base * exp;
    let mut delay = if raw.is_nan() || raw < 0.0 {
        0.0
    } else {
        raw.min(config.max_backoff.as_secs_f64())
    };

    if config.jitter && delay > 0.0 {
        let jitter = rand::thread_rng().gen_range(0.0..=delay * 0.1);
        delay += jitter;
    }

    Duration::from_secs_f64(delay)
}
