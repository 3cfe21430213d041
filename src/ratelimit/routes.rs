//! Route limit table
//!
//! Each guarded route name maps to a fixed `(limit, window)` pair. The
//! built-in table covers the agent and chat routes; the `[rate_limits.routes]`
//! config section overrides or extends it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Admission budget for one route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    /// Requests admitted per window
    pub limit: u32,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl RouteLimit {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window_seconds: 60,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn window_ms(&self) -> u64 {
        self.window_seconds.saturating_mul(1000)
    }

    /// Reject zero limits and zero windows
    pub fn validate(&self, route: &str) -> Result<(), String> {
        if self.limit == 0 {
            return Err(format!("rate_limits.routes.\"{}\".limit must be greater than 0", route));
        }
        if self.window_seconds == 0 {
            return Err(format!(
                "rate_limits.routes.\"{}\".window_seconds must be greater than 0",
                route
            ));
        }
        if self.window_seconds > 86_400 {
            return Err(format!(
                "rate_limits.routes.\"{}\".window_seconds cannot exceed 86400 (one day), got {}",
                route, self.window_seconds
            ));
        }
        Ok(())
    }
}

/// Built-in route budgets
pub const DEFAULT_ROUTES: &[(&str, RouteLimit)] = &[
    ("agents:accommodations", RouteLimit::per_minute(10)),
    ("agents:budget", RouteLimit::per_minute(6)),
    ("agents:destinations", RouteLimit::per_minute(8)),
    ("agents:flights", RouteLimit::per_minute(8)),
    ("agents:itineraries", RouteLimit::per_minute(6)),
    ("agents:memory", RouteLimit::per_minute(10)),
    ("agents:router", RouteLimit::per_minute(100)),
    ("chat:stream", RouteLimit::per_minute(40)),
    ("keys:validate", RouteLimit::per_minute(20)),
    ("search:places", RouteLimit::per_minute(10)),
];

/// Lookup table from route name to its budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLimits {
    routes: BTreeMap<String, RouteLimit>,
}

impl Default for RouteLimits {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES
                .iter()
                .map(|(name, limit)| (name.to_string(), *limit))
                .collect(),
        }
    }
}

impl RouteLimits {
    /// Table with no routes (every route passes through)
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Defaults with `overrides` applied on top
    pub fn with_overrides(overrides: &BTreeMap<String, RouteLimit>) -> Self {
        let mut limits = Self::default();
        for (name, limit) in overrides {
            limits.routes.insert(name.clone(), *limit);
        }
        limits
    }

    pub fn insert(mut self, route: &str, limit: RouteLimit) -> Self {
        self.routes.insert(route.to_string(), limit);
        self
    }

    pub fn get(&self, route: &str) -> Option<RouteLimit> {
        self.routes.get(route).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
