//! HTTP request handlers for Tripguard

use crate::cache::ToolCache;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::provider::{CredentialStore, MemoryCredentialStore, ProviderResolver, ProviderSettings};
use crate::ratelimit::{Clock, RateLimiter, SystemClock};
use crate::retry::RetryPolicy;
use crate::retry::http::{UpstreamError, upstream_policy};
use crate::store::{self, KvStore, StoreHandle};
use crate::telemetry::{Telemetry, TelemetrySink, TracingSink};
use axum::{
    Router,
    body::Bytes,
    middleware,
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub mod cache;
pub mod guard;
pub mod health;
pub mod metrics;

/// External collaborators the guardrails run against
///
/// `from_config` wires the production defaults; tests swap in memory-backed
/// implementations.
pub struct Collaborators {
    pub store: StoreHandle,
    pub settings: ProviderSettings,
    pub credentials: Arc<dyn CredentialStore>,
    pub sink: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Store from `[store]`, provider settings from the environment
    ///
    /// User credentials are kept in process memory; hosts with a persistent
    /// credential database supply their own `CredentialStore`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            store: store::from_config(&config.store),
            settings: ProviderSettings::from_env(),
            credentials: Arc::new(MemoryCredentialStore::new()),
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Application state shared across all handlers
///
/// All fields are Arc'd (or Arc-backed) for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    metrics: Metrics,
    telemetry: Telemetry,
    store: StoreHandle,
    limiter: Arc<RateLimiter>,
    resolver: Arc<ProviderResolver>,
    tool_cache: ToolCache,
    upstream_retry: Arc<RetryPolicy<UpstreamError>>,
}

impl AppState {
    /// Create state with production collaborators
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let collaborators = Collaborators::from_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: Arc<Config>, collaborators: Collaborators) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to register metrics: {}", e)))?;
        let telemetry = Telemetry::new(collaborators.sink).with_metrics(metrics.clone());

        let limiter = RateLimiter::new(config.rate_limits.route_limits(), telemetry.clone())
            .with_algorithm(config.rate_limits.algorithm)
            .with_clock(collaborators.clock);
        let resolver = ProviderResolver::new(
            Arc::new(collaborators.settings),
            collaborators.credentials,
            telemetry.clone(),
        );
        let tool_cache = ToolCache::new(collaborators.store.clone(), telemetry.clone());
        let upstream_retry = upstream_policy(&config.retry)
            .map_err(|reason| AppError::Config(format!("retry: {}", reason)))?
            .with_metrics(metrics.clone());

        Ok(Self {
            config,
            metrics,
            telemetry,
            store: collaborators.store,
            limiter: Arc::new(limiter),
            resolver: Arc::new(resolver),
            tool_cache,
            upstream_retry: Arc::new(upstream_retry),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The key-value store, if one is configured
    pub fn store(&self) -> Option<&dyn KvStore> {
        self.store.as_deref()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn resolver(&self) -> &ProviderResolver {
        &self.resolver
    }

    pub fn tool_cache(&self) -> &ToolCache {
        &self.tool_cache
    }

    /// Retry policy for outbound tool calls, built from `[retry]`
    ///
    /// Pass it to `retry::http::send_with_retry`.
    pub fn upstream_retry(&self) -> &RetryPolicy<UpstreamError> {
        &self.upstream_retry
    }
}

/// Decode an optional JSON body; an empty body is `None`
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
}

/// Full HTTP application with middleware
pub fn app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config().server.request_timeout_seconds);
    Router::new()
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/v1/guard/{route}", post(guard::handler))
        .route("/v1/cache/invalidate", post(cache::invalidate))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;
    use crate::telemetry::MemorySink;
    use std::str::FromStr;

    pub const TEST_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[rate_limits.routes]
"test:route" = { limit = 2, window_seconds = 60 }
"#;

    pub struct TestState {
        pub state: AppState,
        pub store: MemoryStore,
        pub credentials: MemoryCredentialStore,
        pub sink: Arc<MemorySink>,
        pub clock: ManualClock,
    }

    pub fn state_with(settings: ProviderSettings) -> TestState {
        let config = Arc::new(Config::from_str(TEST_CONFIG).expect("test config should parse"));
        let store = MemoryStore::new();
        let credentials = MemoryCredentialStore::new();
        let sink = Arc::new(MemorySink::new());
        let clock = ManualClock::new(1_000_000);

        let state = AppState::with_collaborators(
            config,
            Collaborators {
                store: Some(Arc::new(store.clone())),
                settings,
                credentials: Arc::new(credentials.clone()),
                sink: sink.clone(),
                clock: Arc::new(clock.clone()),
            },
        )
        .expect("state should build");

        TestState {
            state,
            store,
            credentials,
            sink,
            clock,
        }
    }
}
