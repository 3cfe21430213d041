//! Configuration management for Tripguard
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Provider credentials are not part of this file; they come from the
//! environment through `ProviderSettings::from_env`.

use crate::error::{AppError, AppResult};
use crate::ratelimit::{Algorithm, RouteLimit, RouteLimits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const STORE_URL_ENV: &str = "UPSTASH_REDIS_REST_URL";
pub const STORE_TOKEN_ENV: &str = "UPSTASH_REDIS_REST_TOKEN";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Shared key-value store (Redis over REST)
///
/// With neither a URL/token pair nor `in_memory`, the process runs without a
/// store: rate limiting passes through and tag versions stay at 1.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Use a process-local store when no REST store is configured
    #[serde(default)]
    pub in_memory: bool,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_timeout_ms() -> u64 {
    1_500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            in_memory: false,
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// URL and token, only when both are set and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        Some((url, token))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Environment values replace file values when present
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(STORE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.url = Some(url);
        }
        if let Some(token) = lookup(STORE_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RateLimitsConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Per-route overrides merged over the built-in table
    #[serde(default)]
    pub routes: BTreeMap<String, RouteLimit>,
}

impl RateLimitsConfig {
    pub fn route_limits(&self) -> RouteLimits {
        RouteLimits::with_overrides(&self.routes)
    }
}

/// Default retry policy for outbound HTTP calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_attempts() -> u32 {
    crate::retry::DEFAULT_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    crate::retry::DEFAULT_BASE_DELAY_MS
}

fn default_jitter_ratio() -> f64 {
    crate::retry::DEFAULT_JITTER_RATIO
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display.clone(),
            source,
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply environment overrides (store credentials)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.store.apply_env(lookup);
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.server.request_timeout_seconds == 0 || self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds must be in (0, 300], got {}",
                self.server.request_timeout_seconds
            )));
        }

        if let Some(url) = self.store.url.as_deref()
            && !url.is_empty()
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "store.url '{}' must start with 'http://' or 'https://'",
                url
            )));
        }
        if self.store.timeout_ms == 0 {
            return Err(AppError::Config(
                "store.timeout_ms must be greater than 0".to_string(),
            ));
        }

        for (route, limit) in &self.rate_limits.routes {
            limit.validate(route).map_err(AppError::Config)?;
        }

        crate::retry::RetryPolicy::<()>::from_config(&self.retry)
            .map_err(|reason| AppError::Config(format!("retry: {}", reason)))?;
        if let Some(max) = self.retry.max_delay_ms
            && max < self.retry.base_delay_ms
        {
            return Err(AppError::Config(format!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                max, self.retry.base_delay_ms
            )));
        }

        match self.observability.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(AppError::Config(format!(
                    "observability.log_level '{}' must be one of trace, debug, info, warn, error",
                    other
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
            path: "<string>".to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }
}
