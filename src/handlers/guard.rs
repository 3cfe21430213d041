//! Guardrail preflight for agent routes
//!
//! `POST /v1/guard/{route}` runs the two per-request guardrails in order:
//! rate-limit admission for the caller on that route, then provider
//! resolution. Route handlers of the host application call this before
//! starting a model call.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::handlers::{AppState, parse_json_body};
use crate::identity::Identity;
use crate::provider::{BaseUrlSource, ProviderId, ResolutionPath, ResolvedProvider};
use crate::ratelimit::RateLimitVerdict;

const MAX_ROUTE_LEN: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct GuardRequest {
    /// Advisory model hint, `provider/model` or a bare model name
    #[serde(default)]
    pub model: Option<String>,
}

/// Provider decision without the credential
#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub provider: ProviderId,
    pub model_id: String,
    pub path: ResolutionPath,
    pub base_url_source: Option<BaseUrlSource>,
    pub base_url_host: Option<String>,
    pub max_output_tokens: Option<u32>,
    /// Names of the attribution headers that will be attached
    pub headers: Vec<String>,
}

impl From<&ResolvedProvider> for ProviderSummary {
    fn from(resolved: &ResolvedProvider) -> Self {
        Self {
            provider: resolved.provider,
            model_id: resolved.model_id.clone(),
            path: resolved.path,
            base_url_source: resolved.base_url_source,
            base_url_host: resolved.base_url_host(),
            max_output_tokens: resolved.max_output_tokens,
            headers: resolved.headers.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GuardResponse {
    pub route: String,
    pub anonymous: bool,
    /// `null` when the limiter passed the request through unchecked
    pub rate_limit: Option<RateLimitVerdict>,
    pub provider: ProviderSummary,
}

/// Route names look like `agents:flights`
fn validate_route(route: &str) -> AppResult<()> {
    if route.is_empty() || route.len() > MAX_ROUTE_LEN {
        return Err(AppError::Validation(format!(
            "Route name must be 1-{} characters",
            MAX_ROUTE_LEN
        )));
    }
    if !route
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'))
    {
        return Err(AppError::Validation(format!(
            "Route name '{}' may only contain letters, digits, ':', '-', '_' and '.'",
            route
        )));
    }
    Ok(())
}

pub async fn handler(
    State(state): State<AppState>,
    Path(route): Path<String>,
    identity: Identity,
    body: Bytes,
) -> AppResult<Response> {
    validate_route(&route)?;
    let request: GuardRequest = parse_json_body(&body)?.unwrap_or_default();

    let verdict = state
        .limiter()
        .admit(&route, &identity.partition_key(), state.store())
        .await?;

    let resolved = state
        .resolver()
        .resolve(&identity, request.model.as_deref())
        .await?;

    tracing::debug!(
        route = %route,
        provider = resolved.provider.as_str(),
        path = resolved.path.as_str(),
        throttled = verdict.is_some(),
        "Guard preflight passed"
    );

    let mut headers = HeaderMap::new();
    if let Some(verdict) = &verdict {
        for (name, value) in verdict.headers() {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }

    let body = GuardResponse {
        route,
        anonymous: identity.is_anonymous(),
        rate_limit: verdict,
        provider: ProviderSummary::from(&resolved),
    };

    Ok((headers, Json(body)).into_response())
}
