//! Telemetry and observability setup
//!
//! Two concerns live here:
//! - process-wide structured logging (`init`), configured once with tracing-subscriber
//! - the `Telemetry` adapter handed to each guardrail component: it forwards
//!   decision events to a `TelemetrySink`, owns the warn-once set for
//!   store-unavailable alerts, and optionally feeds Prometheus counters.

use crate::metrics::Metrics;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, Once};
use tracing::Instrument;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Placeholder written in place of redacted attribute values
pub const REDACTED: &str = "[REDACTED]";

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
///
/// Reads log level from RUST_LOG environment variable, defaulting to the
/// level specified in config (or "info" if not set).
///
/// # Examples
///
/// ```no_run
/// tripguard::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("tripguard={},tower_http=debug", default_level))
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// Destination for guardrail telemetry events
///
/// Attribute values must already be free of credentials and raw user input.
pub trait TelemetrySink: Send + Sync {
    fn record_event(&self, name: &str, attributes: &[(&str, String)]);
}

/// Sink that emits each event as a structured `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_event(&self, name: &str, attributes: &[(&str, String)]) {
        tracing::info!(event = name, attributes = ?attributes, "guardrail event");
    }
}

/// A recorded event, as captured by `MemorySink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl RecordedEvent {
    /// Look up an attribute value by key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sink that keeps events in memory, for tests and debugging endpoints
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given name
    pub fn events_named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn record_event(&self, name: &str, attributes: &[(&str, String)]) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                name: name.to_string(),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            });
        }
    }
}

/// Telemetry adapter shared by the guardrail components
///
/// Cheap to clone; clones share the sink, the warn-once set and the metrics.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
    warned: Arc<Mutex<HashSet<String>>>,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            warned: Arc::new(Mutex::new(HashSet::new())),
            metrics: None,
        }
    }

    /// Attach Prometheus metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn record_event(&self, name: &str, attributes: &[(&str, String)]) {
        self.sink.record_event(name, attributes);
    }

    /// Log an operational alert for `feature` the first time it degrades
    ///
    /// Returns true if this call emitted the warning. The degradation counter is
    /// incremented on every call so the rate stays visible after the first log.
    pub fn warn_once(&self, feature: &str, message: &str) -> bool {
        if let Some(metrics) = &self.metrics {
            metrics.degraded(feature);
        }

        let first = match self.warned.lock() {
            Ok(mut warned) => warned.insert(feature.to_string()),
            // Poisoned: warn again
            Err(_) => true,
        };

        if first {
            tracing::warn!(feature = feature, "{}", message);
            self.record_event(
                "guardrail.degraded",
                &[("feature", feature.to_string()), ("message", message.to_string())],
            );
        }
        first
    }

    /// Forget which features have already warned
    pub fn reset_warnings(&self) {
        if let Ok(mut warned) = self.warned.lock() {
            warned.clear();
        }
    }

    /// Whether `feature` has already emitted its degradation warning
    pub fn has_warned(&self, feature: &str) -> bool {
        self.warned
            .lock()
            .map(|warned| warned.contains(feature))
            .unwrap_or(false)
    }
}

/// Replace the values of `redact_keys` with a placeholder
pub fn redact_attributes(
    attributes: &[(&str, String)],
    redact_keys: &[&str],
) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = if redact_keys.contains(key) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Run `future` inside a tracing span carrying redacted attributes
///
/// The span records `name` and the attribute list with every key in
/// `redact_keys` replaced by `[REDACTED]`. On completion a
/// `{name}.completed` event with the elapsed milliseconds is sent to the sink.
pub async fn in_span<F, T>(
    telemetry: &Telemetry,
    name: &str,
    attributes: &[(&str, String)],
    redact_keys: &[&str],
    future: F,
) -> T
where
    F: Future<Output = T>,
{
    let redacted = redact_attributes(attributes, redact_keys);
    let span = tracing::info_span!("guardrail", operation = name, attributes = ?redacted);
    let start = std::time::Instant::now();

    let output = future.instrument(span).await;

    let mut completion: Vec<(&str, String)> = redacted
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    let elapsed_ms = start.elapsed().as_millis().to_string();
    completion.push(("duration_ms", elapsed_ms));
    telemetry.record_event(&format!("{}.completed", name), &completion);

    output
}
