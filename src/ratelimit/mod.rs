//! Per-route, per-identifier admission control
//!
//! Counters live in the shared key-value store and are keyed by
//! `(route, identifier, window)`. The limiter only admits or rejects; it never
//! queues or delays a request.
//!
//! The limiter is a best-effort abuse defense, not a correctness dependency:
//! when no store is configured, the route is unknown, or the store fails,
//! `enforce` returns `None` and the request proceeds unthrottled.

use crate::error::AppError;
use crate::metrics::Admission;
use crate::store::{Command, KvStore};
use crate::telemetry::Telemetry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod clock;
pub mod routes;

pub use clock::{Clock, ManualClock, SystemClock};
pub use routes::{RouteLimit, RouteLimits};

const FEATURE: &str = "ratelimit";

/// Counter key namespace
pub const KEY_PREFIX: &str = "ratelimit";

/// Metrics label for routes missing from the route table
///
/// Route names arrive from request paths, so only configured routes get
/// their own series.
pub const UNKNOWN_ROUTE_LABEL: &str = "unknown";

/// Window accounting strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Discrete epoch-aligned windows; counters reset at each boundary
    #[default]
    Fixed,
    /// Current window plus the previous window weighted by how much of it
    /// still overlaps the trailing interval
    Sliding,
}

/// Result of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitVerdict {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window
    ///
    /// With `Algorithm::Sliding` this is a lower bound: the weighted carry-over
    /// from the current window can still deny requests shortly after it.
    pub reset_at_epoch_ms: u64,
    /// Whole seconds from the decision until `reset_at_epoch_ms`, at least 1
    /// (a lower bound under `Algorithm::Sliding`)
    pub retry_after_secs: u64,
}

/// Whole seconds from `now_ms` until `reset_at_ms`, rounded up and at least 1
pub fn seconds_until(reset_at_ms: u64, now_ms: u64) -> u64 {
    reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

impl RateLimitVerdict {
    /// Standard rate-limit response headers; `retry-after` only when denied
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_at_epoch_ms.to_string()),
        ];
        if !self.allowed {
            headers.push(("retry-after", self.retry_after_secs.to_string()));
        }
        headers
    }
}

/// Store key for the counter of `identifier` on `route` in window `index`
pub fn counter_key(route: &str, identifier: &str, index: u64) -> String {
    format!("{}:{}:{}:{}", KEY_PREFIX, route, identifier, index)
}

/// Route-aware rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    routes: RouteLimits,
    algorithm: Algorithm,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl RateLimiter {
    pub fn new(routes: RouteLimits, telemetry: Telemetry) -> Self {
        Self {
            routes,
            algorithm: Algorithm::default(),
            clock: Arc::new(SystemClock),
            telemetry,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn routes(&self) -> &RouteLimits {
        &self.routes
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn record(&self, route: &str, outcome: Admission) {
        if let Some(metrics) = self.telemetry.metrics() {
            metrics.record_admission(self.route_label(route), outcome);
        }
    }

    /// Metrics label for `route`: the name itself if configured, else `unknown`
    pub fn route_label<'a>(&self, route: &'a str) -> &'a str {
        if self.routes.get(route).is_some() {
            route
        } else {
            UNKNOWN_ROUTE_LABEL
        }
    }

    /// Count this request against `(route, identifier)` and decide admission
    ///
    /// Returns `None` when the limiter cannot decide (no store, unknown route,
    /// store failure); callers must then let the request through.
    pub async fn enforce(
        &self,
        route: &str,
        identifier: &str,
        store: Option<&dyn KvStore>,
    ) -> Option<RateLimitVerdict> {
        let Some(store) = store else {
            self.telemetry.warn_once(
                FEATURE,
                "Rate limiting disabled: no key-value store configured",
            );
            self.record(route, Admission::PassThrough);
            return None;
        };

        let Some(limit) = self.routes.get(route) else {
            tracing::debug!(route = route, "No rate limit configured for route, passing through");
            self.record(route, Admission::PassThrough);
            return None;
        };

        let verdict = match self.count(route, identifier, limit, store).await {
            Ok(verdict) => verdict,
            Err(message) => {
                self.telemetry.warn_once(
                    FEATURE,
                    &format!("Rate limiting degraded to pass-through: {}", message),
                );
                self.record(route, Admission::PassThrough);
                return None;
            }
        };

        if verdict.allowed {
            tracing::debug!(
                route = route,
                remaining = verdict.remaining,
                limit = verdict.limit,
                "Request admitted"
            );
            self.record(route, Admission::Allowed);
        } else {
            tracing::info!(
                route = route,
                limit = verdict.limit,
                reset_at_epoch_ms = verdict.reset_at_epoch_ms,
                "Request rejected by rate limit"
            );
            self.record(route, Admission::Denied);
        }

        Some(verdict)
    }

    /// `enforce`, with a rejection turned into `AppError::RateLimited`
    pub async fn admit(
        &self,
        route: &str,
        identifier: &str,
        store: Option<&dyn KvStore>,
    ) -> Result<Option<RateLimitVerdict>, AppError> {
        match self.enforce(route, identifier, store).await {
            Some(verdict) if !verdict.allowed => Err(AppError::RateLimited {
                route: route.to_string(),
                verdict,
            }),
            other => Ok(other),
        }
    }

    async fn count(
        &self,
        route: &str,
        identifier: &str,
        limit: RouteLimit,
        store: &dyn KvStore,
    ) -> Result<RateLimitVerdict, String> {
        let window_ms = limit.window_ms().max(1);
        let now = self.clock.now_ms();
        let index = now / window_ms;
        let window_start = index * window_ms;
        let reset_at_epoch_ms = window_start + window_ms;

        let current_key = counter_key(route, identifier, index);
        // Keep counters for two windows so the sliding estimate can read the previous one
        let mut commands = vec![
            Command::Incr(current_key.clone()),
            Command::Expire {
                key: current_key,
                ttl: limit.window() * 2,
            },
        ];
        if self.algorithm == Algorithm::Sliding {
            commands.push(Command::Get(counter_key(
                route,
                identifier,
                index.saturating_sub(1),
            )));
        }

        let replies = store.pipeline(commands).await.map_err(|e| e.to_string())?;

        let current = replies
            .first()
            .and_then(|r| r.as_int())
            .ok_or_else(|| "INCR reply missing from pipeline".to_string())?;
        let current = u64::try_from(current).unwrap_or(0);

        let used = match self.algorithm {
            Algorithm::Fixed => current,
            Algorithm::Sliding => {
                let previous = if index == 0 {
                    0
                } else {
                    replies
                        .get(2)
                        .cloned()
                        .and_then(|r| r.into_value())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0)
                };
                let elapsed = (now - window_start) as f64 / window_ms as f64;
                let carried = (previous as f64 * (1.0 - elapsed)).floor() as u64;
                carried + current
            }
        };

        let budget = u64::from(limit.limit);
        Ok(RateLimitVerdict {
            allowed: used <= budget,
            limit: limit.limit,
            remaining: u32::try_from(budget.saturating_sub(used)).unwrap_or(0),
            reset_at_epoch_ms,
            retry_after_secs: seconds_until(reset_at_epoch_ms, now),
        })
    }
}
