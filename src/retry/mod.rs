//! Retry with jittered exponential backoff
//!
//! `retry_with_backoff` runs a fallible async operation up to `attempts` times.
//! Callers decide what is retryable. The guardrails never retry store calls;
//! the `[retry]` section configures the policy for outbound tool calls
//! (`AppState::upstream_retry`).
//!
//! Delay before retry *n* (1-indexed attempt that just failed):
//!
//! ```text
//! base  = min(base_delay_ms * 2^(n-1), max_delay_ms)
//! delay = base - base*jitter/2 + uniform(0, base*jitter)
//! ```
//!
//! There is no cancellation token. Callers that need a latency bound wrap the
//! whole call in `tokio::time::timeout`.

use crate::metrics::{Metrics, RetryOutcome};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod http;

/// Default number of attempts (including the first)
pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds (doubles each retry)
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
/// Default jitter ratio
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Information passed to the `on_retry` observer before each wait
#[derive(Debug)]
pub struct RetryEvent<'a, E> {
    /// The attempt that just failed (1-indexed)
    pub attempt: u32,
    /// How long we will sleep before the next attempt
    pub delay_ms: u64,
    pub error: &'a E,
}

type RetryPredicate<E> = Box<dyn Fn(&E, u32) -> bool + Send + Sync>;
type RetryObserver<E> = Box<dyn for<'a> Fn(&RetryEvent<'a, E>) + Send + Sync>;

/// Per-call-site retry configuration
///
/// Constructed where it is used; never shared as mutable state.
pub struct RetryPolicy<E> {
    attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: Option<u64>,
    jitter_ratio: f64,
    is_retryable: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
    metrics: Option<Metrics>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy that retries every error
    ///
    /// # Errors
    /// Returns an error if `attempts` is 0 (at least 1 attempt is required)
    pub fn new(attempts: u32, base_delay_ms: u64) -> Result<Self, &'static str> {
        if attempts == 0 {
            return Err("attempts must be at least 1");
        }
        Ok(Self {
            attempts,
            base_delay_ms,
            max_delay_ms: None,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            is_retryable: Box::new(|_, _| true),
            on_retry: None,
            metrics: None,
        })
    }

    /// Build a policy from the `[retry]` config section
    pub fn from_config(config: &crate::config::RetryConfig) -> Result<Self, &'static str> {
        Self::new(config.attempts, config.base_delay_ms)?
            .with_jitter_ratio(config.jitter_ratio)
            .map(|policy| match config.max_delay_ms {
                Some(max) => policy.with_max_delay_ms(max),
                None => policy,
            })
    }

    /// Cap the un-jittered delay
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Set the jitter ratio
    ///
    /// # Errors
    /// Returns an error unless `ratio` is finite and within `[0, 1]`
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Result<Self, &'static str> {
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err("jitter_ratio must be a finite number between 0.0 and 1.0");
        }
        self.jitter_ratio = ratio;
        Ok(self)
    }

    /// Decide per error (and attempt number) whether to keep trying
    pub fn retry_if(mut self, predicate: impl Fn(&E, u32) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Box::new(predicate);
        self
    }

    /// Observe each retry before the wait, typically for logging
    pub fn on_retry(
        mut self,
        observer: impl for<'a> Fn(&RetryEvent<'a, E>) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    /// Count failed attempts in Prometheus
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> Option<u64> {
        self.max_delay_ms
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    fn record(&self, outcome: RetryOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(outcome);
        }
    }
}

/// Un-jittered exponential delay for `attempt`, with overflow protection
///
/// Attempt 0 is treated as attempt 1.
pub fn base_delay<E>(policy: &RetryPolicy<E>, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let raw = policy
        .base_delay_ms
        .saturating_mul(2_u64.saturating_pow(exponent));
    match policy.max_delay_ms {
        Some(max) => raw.min(max),
        None => raw,
    }
}

/// Jittered delay for `attempt` given a uniform sample `unit` in `[0, 1]`
///
/// The result stays within `base ± base*jitter/2`, centered on the
/// un-jittered value.
pub fn compute_delay<E>(policy: &RetryPolicy<E>, attempt: u32, unit: f64) -> u64 {
    let base = base_delay(policy, attempt) as f64;
    let spread = base * policy.jitter_ratio;
    let unit = unit.clamp(0.0, 1.0);
    let delay = base - spread / 2.0 + unit * spread;
    delay.max(0.0).round() as u64
}

/// Terminal failure of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("operation failed after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },

    #[error("operation failed with a non-retryable error on attempt {attempt}: {error}")]
    NotRetryable { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// The last error seen
    pub fn error(&self) -> &E {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::NotRetryable { error, .. } => error,
        }
    }

    /// Unwrap into the last error seen
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::NotRetryable { error, .. } => error,
        }
    }

    /// How many times the operation ran
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NotRetryable { attempt, .. } => *attempt,
        }
    }
}

/// Run `operation` with retries according to `policy`
///
/// `operation` receives the 1-indexed attempt number. Returns the first
/// success, or the last error once attempts run out or the policy's
/// predicate declines to retry.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt >= policy.attempts {
            tracing::warn!(
                attempts = attempt,
                error = %error,
                "All retry attempts exhausted"
            );
            policy.record(RetryOutcome::Exhausted);
            return Err(RetryError::Exhausted {
                attempts: attempt,
                error,
            });
        }

        if !(policy.is_retryable)(&error, attempt) {
            tracing::debug!(
                attempt = attempt,
                error = %error,
                "Error is not retryable, giving up"
            );
            policy.record(RetryOutcome::NotRetryable);
            return Err(RetryError::NotRetryable { attempt, error });
        }

        let delay_ms = compute_delay(policy, attempt, rand::random::<f64>());
        tracing::debug!(
            attempt = attempt,
            max_attempts = policy.attempts,
            delay_ms = delay_ms,
            error = %error,
            "Attempt failed, backing off before retry"
        );
        policy.record(RetryOutcome::Retried);

        if let Some(observer) = &policy.on_retry {
            observer(&RetryEvent {
                attempt,
                delay_ms,
                error: &error,
            });
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32, base: u64) -> RetryPolicy<String> {
        RetryPolicy::new(attempts, base).expect("valid policy")
    }

    #[test]
    fn test_policy_rejects_zero_attempts() {
        let result = RetryPolicy::<String>::new(0, 100);
        assert!(result.unwrap_err().contains("at least 1"));
    }

    #[test]
    fn test_policy_rejects_out_of_range_jitter() {
        assert!(policy(3, 100).with_jitter_ratio(1.5).is_err());
        assert!(policy(3, 100).with_jitter_ratio(-0.1).is_err());
        assert!(policy(3, 100).with_jitter_ratio(f64::NAN).is_err());
        assert!(policy(3, 100).with_jitter_ratio(1.0).is_ok());
    }

    #[test]
    fn test_base_delay_doubles() {
        let p = policy(5, 100);
        assert_eq!(base_delay(&p, 1), 100);
        assert_eq!(base_delay(&p, 2), 200);
        assert_eq!(base_delay(&p, 3), 400);
        assert_eq!(base_delay(&p, 4), 800);
    }

    #[test]
    fn test_base_delay_respects_cap() {
        let p = policy(10, 1000).with_max_delay_ms(5000);
        assert_eq!(base_delay(&p, 3), 4000);
        assert_eq!(base_delay(&p, 4), 5000);
        assert_eq!(base_delay(&p, 9), 5000);
    }

    #[test]
    fn test_base_delay_saturates_without_cap() {
        let p = policy(100, 100);
        assert_eq!(base_delay(&p, 80), u64::MAX);
    }

    #[test]
    fn test_base_delay_attempt_zero_treated_as_one() {
        assert_eq!(base_delay(&policy(3, 100), 0), 100);
    }

    #[test]
    fn test_compute_delay_is_centered_on_base() {
        let p = policy(3, 1000).with_jitter_ratio(0.2).unwrap();
        // attempt 2 → base 2000, spread 400
        assert_eq!(compute_delay(&p, 2, 0.0), 1800);
        assert_eq!(compute_delay(&p, 2, 0.5), 2000);
        assert_eq!(compute_delay(&p, 2, 1.0), 2200);
    }

    #[test]
    fn test_compute_delay_without_jitter_is_exact() {
        let p = policy(3, 300).with_jitter_ratio(0.0).unwrap();
        assert_eq!(compute_delay(&p, 1, 0.9), 300);
    }

    #[test]
    fn test_retry_error_accessors() {
        let err: RetryError<String> = RetryError::NotRetryable {
            attempt: 1,
            error: "HTTP 404".to_string(),
        };
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.error(), "HTTP 404");
        assert!(err.to_string().contains("non-retryable"));
        assert_eq!(err.into_inner(), "HTTP 404");
    }
}
