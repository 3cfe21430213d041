//! Cache invalidation endpoint
//!
//! `POST /v1/cache/invalidate` bumps the version of each named tag, which
//! orphans every tool result cached under the previous versions.
//!
//! The endpoint has no authentication of its own. Deploy it behind the same
//! auth proxy as the guard routes and keep it off the public path; any caller
//! that reaches it can flush the tool cache.

use axum::{Json, body::Bytes, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::handlers::{AppState, parse_json_body};

/// Upper bound on tags per request
pub const MAX_TAGS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    /// New version per tag (1 for every tag when no store is available)
    pub versions: BTreeMap<String, u64>,
    pub store_available: bool,
}

fn validate_tags(tags: &[String]) -> AppResult<()> {
    if tags.is_empty() {
        return Err(AppError::Validation("tags must not be empty".to_string()));
    }
    if tags.len() > MAX_TAGS {
        return Err(AppError::Validation(format!(
            "At most {} tags can be invalidated per request, got {}",
            MAX_TAGS,
            tags.len()
        )));
    }
    if let Some(bad) = tags
        .iter()
        .find(|t| t.trim().is_empty() || t.chars().any(char::is_whitespace))
    {
        return Err(AppError::Validation(format!(
            "Invalid tag '{}': tags must be non-empty and contain no whitespace",
            bad
        )));
    }
    Ok(())
}

pub async fn invalidate(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<InvalidateResponse>> {
    let request: InvalidateRequest = parse_json_body(&body)?
        .ok_or_else(|| AppError::Validation("Request body is required".to_string()))?;
    validate_tags(&request.tags)?;

    let tags: Vec<&str> = request.tags.iter().map(String::as_str).collect();
    let versions = state.tool_cache().tags().bump_tags(&tags).await;

    tracing::info!(tags = ?tags, "Cache tags invalidated");

    Ok(Json(InvalidateResponse {
        versions,
        store_available: state.store().is_some(),
    }))
}
