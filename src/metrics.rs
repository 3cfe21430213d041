//! Prometheus metrics collection for Tripguard
//!
//! This module provides metrics instrumentation for tracking:
//! - Admission decisions by route and outcome
//! - Provider resolutions by provider and credential path
//! - Retry attempts and their outcomes
//! - Degraded operation when the key-value store is unavailable
//! - Cache tag bumps
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Admission outcome for type-safe metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted within the limit
    Allowed,
    /// Request rejected with 429
    Denied,
    /// Limiter not configured or store unavailable; request proceeds unthrottled
    PassThrough,
}

impl Admission {
    /// Convert outcome to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Allowed => "allowed",
            Admission::Denied => "denied",
            Admission::PassThrough => "pass_through",
        }
    }
}

/// Retry outcome for type-safe metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A failed attempt that will be retried
    Retried,
    /// Operation gave up because the error was not retryable
    NotRetryable,
    /// Operation gave up after the last attempt
    Exhausted,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Retried => "retried",
            RetryOutcome::NotRetryable => "not_retryable",
            RetryOutcome::Exhausted => "exhausted",
        }
    }
}

/// Metrics collector for Tripguard
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    admissions: IntCounterVec,
    provider_resolutions: IntCounterVec,
    provider_failures: IntCounter,
    retry_attempts: IntCounterVec,
    degraded: IntCounterVec,
    tag_bumps: IntCounter,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: the limiter labels only configured routes by name and
        // folds every other route into `unknown`, so this is bounded by
        // (configured routes + 1) × 3 outcomes
        let admissions = IntCounterVec::new(
            Opts::new(
                "tripguard_admissions_total",
                "Rate limiter admission decisions by route and outcome",
            ),
            &["route", "outcome"],
        )?;

        let provider_resolutions = IntCounterVec::new(
            Opts::new(
                "tripguard_provider_resolutions_total",
                "Successful provider resolutions by provider and credential path",
            ),
            &["provider", "path"],
        )?;

        let provider_failures = IntCounter::with_opts(Opts::new(
            "tripguard_provider_resolution_failures_total",
            "Provider resolutions that found no usable credential on any path. \
            Any increase means requests are being answered with 503.",
        ))?;

        let retry_attempts = IntCounterVec::new(
            Opts::new(
                "tripguard_retry_attempts_total",
                "Failed attempts inside retry-with-backoff, by what happened next",
            ),
            &["outcome"],
        )?;

        // Incremented on every degraded call (the log line is emitted once per feature)
        let degraded = IntCounterVec::new(
            Opts::new(
                "tripguard_degraded_total",
                "Guardrail operations that fell back to a safe default because the store was unavailable",
            ),
            &["feature"],
        )?;

        let tag_bumps = IntCounter::with_opts(Opts::new(
            "tripguard_tag_bumps_total",
            "Cache tag version increments",
        ))?;

        registry.register(Box::new(admissions.clone()))?;
        registry.register(Box::new(provider_resolutions.clone()))?;
        registry.register(Box::new(provider_failures.clone()))?;
        registry.register(Box::new(retry_attempts.clone()))?;
        registry.register(Box::new(degraded.clone()))?;
        registry.register(Box::new(tag_bumps.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            admissions,
            provider_resolutions,
            provider_failures,
            retry_attempts,
            degraded,
            tag_bumps,
        })
    }

    pub fn record_admission(&self, route: &str, outcome: Admission) {
        self.admissions
            .with_label_values(&[route, outcome.as_str()])
            .inc();
    }

    pub fn admissions_count(&self, route: &str, outcome: Admission) -> u64 {
        self.admissions
            .with_label_values(&[route, outcome.as_str()])
            .get()
    }

    /// Record a resolution; `provider` and `path` are static enum labels
    pub fn record_resolution(&self, provider: &'static str, path: &'static str) {
        self.provider_resolutions
            .with_label_values(&[provider, path])
            .inc();
    }

    pub fn resolutions_count(&self, provider: &'static str, path: &'static str) -> u64 {
        self.provider_resolutions
            .with_label_values(&[provider, path])
            .get()
    }

    pub fn record_resolution_failure(&self) {
        self.provider_failures.inc();
    }

    pub fn resolution_failures_count(&self) -> u64 {
        self.provider_failures.get()
    }

    pub fn record_retry(&self, outcome: RetryOutcome) {
        self.retry_attempts
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn retry_count(&self, outcome: RetryOutcome) -> u64 {
        self.retry_attempts
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn degraded(&self, feature: &str) {
        self.degraded.with_label_values(&[feature]).inc();
    }

    pub fn degraded_count(&self, feature: &str) -> u64 {
        self.degraded.with_label_values(&[feature]).get()
    }

    pub fn record_tag_bump(&self) {
        self.tag_bumps.inc();
    }

    pub fn tag_bumps_count(&self) -> u64 {
        self.tag_bumps.get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        tracing::debug!(
            metric_family_count = metric_families.len(),
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(error = %e, "Prometheus text encoder failed");
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_families.len(),
                    e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_creates_registry() {
        let metrics = Metrics::new().expect("Failed to create metrics");

        metrics.record_admission("agents:flights", Admission::Allowed);
        metrics.record_resolution("openai", "direct");
        metrics.record_resolution_failure();
        metrics.record_retry(RetryOutcome::Retried);
        metrics.degraded("ratelimit");
        metrics.record_tag_bump();

        let output = metrics.gather().expect("Failed to gather metrics");
        assert!(output.contains("tripguard_admissions_total"));
        assert!(output.contains("tripguard_provider_resolutions_total"));
        assert!(output.contains("tripguard_provider_resolution_failures_total"));
        assert!(output.contains("tripguard_retry_attempts_total"));
        assert!(output.contains("tripguard_degraded_total"));
        assert!(output.contains("tripguard_tag_bumps_total"));
    }

    #[test]
    fn test_admission_counts_are_per_label() {
        let metrics = Metrics::new().unwrap();
        metrics.record_admission("chat:stream", Admission::Allowed);
        metrics.record_admission("chat:stream", Admission::Allowed);
        metrics.record_admission("chat:stream", Admission::Denied);

        assert_eq!(metrics.admissions_count("chat:stream", Admission::Allowed), 2);
        assert_eq!(metrics.admissions_count("chat:stream", Admission::Denied), 1);
        assert_eq!(
            metrics.admissions_count("chat:stream", Admission::PassThrough),
            0
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Admission::PassThrough.as_str(), "pass_through");
        assert_eq!(RetryOutcome::NotRetryable.as_str(), "not_retryable");
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new().unwrap();
        let clone = metrics.clone();
        clone.record_tag_bump();
        assert_eq!(metrics.tag_bumps_count(), 1);
    }
}
