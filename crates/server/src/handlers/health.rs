//! Health check endpoint.

use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Current cache occupancy in bytes.
    pub cache_size: u64,
}

/// GET /v1/health - liveness probe, intentionally unauthenticated.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cache_size: state.cache.size(),
    })
}
