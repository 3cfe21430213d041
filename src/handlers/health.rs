//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Key-value store backend name, or "disabled"
    pub store: &'static str,
}

/// Health check handler
///
/// Always 200: a missing store degrades the guardrails but never takes the
/// service down.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.store().map(|s| s.name()).unwrap_or("disabled");

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            store,
        }),
    )
}
