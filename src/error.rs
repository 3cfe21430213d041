//! Error types for Tripguard
//!
//! `AppError` is the handler-facing error and implements `IntoResponse` for Axum.
//! Component-level errors (`StoreError`, `ProviderError`, `RetryError`) live next
//! to the code that produces them and convert into `AppError` at the route edge.

use crate::provider::ProviderError;
use crate::ratelimit::RateLimitVerdict;
use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for route {route}")]
    RateLimited {
        route: String,
        verdict: RateLimitVerdict,
    },

    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            // Do not echo which credential paths were probed back to the client
            Self::ProviderUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No model provider is currently available".to_string(),
            ),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        let mut response = (status, body).into_response();

        if let Self::RateLimited { verdict, .. } = &self {
            let headers = response.headers_mut();
            for (name, value) in verdict.headers() {
                if let Ok(header_value) = HeaderValue::from_str(&value) {
                    headers.insert(name, header_value);
                }
            }
        }

        response
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_verdict() -> RateLimitVerdict {
        RateLimitVerdict {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at_epoch_ms: 1_700_000_040_000,
            retry_after_secs: 30,
        }
    }

    #[test]
    fn test_config_error_creates() {
        let err = AppError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_validation_error_response_status() {
        let err = AppError::Validation("test".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_response_carries_retry_headers() {
        let err = AppError::RateLimited {
            route: "agents:flights".to_string(),
            verdict: denied_verdict(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        let retry_after: u64 = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .expect("retry-after header should be numeric");
        assert_eq!(retry_after, 30);
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    }

    #[test]
    fn test_provider_unavailable_is_service_unavailable() {
        let err = AppError::from(ProviderError::NoCredential {
            tried: vec!["openai".to_string()],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_upstream_error_is_bad_gateway() {
        let err = AppError::Upstream("HTTP 503 from api.example.com".to_string());
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_internal_error_response_status() {
        let err = AppError::Internal("test".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
