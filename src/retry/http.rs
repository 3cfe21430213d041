//! Retrying outbound HTTP calls
//!
//! Tool execution talks to third-party APIs (flight search, places, weather).
//! `send_with_retry` wraps a `reqwest` request in `retry_with_backoff` and
//! classifies failures so that 5xx/429/timeouts are retried and other 4xx are not.

use super::{RetryError, RetryEvent, RetryPolicy, retry_with_backoff};
use crate::config::RetryConfig;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;

/// Longest response body excerpt kept in an error
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Failure of a single upstream HTTP attempt
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream {host} returned HTTP {status}: {body}")]
    Status {
        host: String,
        status: StatusCode,
        body: String,
    },

    #[error("upstream {host} request timed out")]
    Timeout { host: String },

    #[error("could not connect to upstream {host}: {message}")]
    Connect { host: String, message: String },

    #[error("upstream {host} request failed: {message}")]
    Transport { host: String, message: String },
}

impl UpstreamError {
    fn from_reqwest(host: String, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout { host }
        } else if error.is_connect() {
            UpstreamError::Connect {
                host,
                message: error.to_string(),
            }
        } else {
            UpstreamError::Transport {
                host,
                message: error.to_string(),
            }
        }
    }

    /// HTTP status, when the upstream answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Default retryability rule for upstream calls
///
/// Retries server errors, 408, 429, timeouts and connection failures.
/// Other 4xx responses and generic transport errors are permanent.
pub fn is_retryable_upstream(error: &UpstreamError, _attempt: u32) -> bool {
    match error {
        UpstreamError::Status { status, .. } => {
            status.is_server_error()
                || *status == StatusCode::TOO_MANY_REQUESTS
                || *status == StatusCode::REQUEST_TIMEOUT
        }
        UpstreamError::Timeout { .. } | UpstreamError::Connect { .. } => true,
        UpstreamError::Transport { .. } => false,
    }
}

/// Policy for upstream calls built from the `[retry]` config section
///
/// Retries with `is_retryable_upstream` and logs each retry at `warn`.
pub fn upstream_policy(config: &RetryConfig) -> Result<RetryPolicy<UpstreamError>, &'static str> {
    Ok(RetryPolicy::<UpstreamError>::from_config(config)?
        .retry_if(is_retryable_upstream)
        .on_retry(|event: &RetryEvent<'_, UpstreamError>| {
            tracing::warn!(
                attempt = event.attempt,
                delay_ms = event.delay_ms,
                status = ?event.error.status(),
                error = %event.error,
                "Upstream call failed, retrying"
            );
        }))
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body
    } else {
        let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        truncated.push('…');
        truncated
    }
}

/// Send a request built by `build` until it succeeds or `policy` gives up
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed
/// by sending. A response counts as success when its status is 2xx.
pub async fn send_with_retry<B>(
    client: &Client,
    build: B,
    policy: &RetryPolicy<UpstreamError>,
) -> Result<Response, RetryError<UpstreamError>>
where
    B: Fn(&Client) -> RequestBuilder,
{
    retry_with_backoff(policy, |attempt| {
        let request = build(client);
        async move {
            let request = request.build().map_err(|e| UpstreamError::Transport {
                host: "<unbuilt>".to_string(),
                message: e.to_string(),
            })?;
            let host = request.url().host_str().unwrap_or("unknown").to_string();

            tracing::debug!(
                host = %host,
                method = %request.method(),
                attempt = attempt,
                "Sending upstream request"
            );

            let response = client
                .execute(request)
                .await
                .map_err(|e| UpstreamError::from_reqwest(host.clone(), e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            Err(UpstreamError::Status {
                host,
                status,
                body: truncate_body(body),
            })
        }
    })
    .await
}
