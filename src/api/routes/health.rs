//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;
use tracing::warn;

use crate::api::state::ApiState;
use crate::api::types::{ApiResponse, HealthResponse, ok};

/// GET /api/v1/health
///
/// Liveness plus a storage probe. Answers 200 even when storage is down so
/// the probe result stays visible.
pub async fn health_check(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    let storage = match state.storage.health_check().await {
        Ok(health) => health.healthy,
        Err(e) => {
            warn!("storage health check failed: {}", e);
            false
        }
    };

    ok(HealthResponse {
        status: if storage { "ok" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        storage,
    })
}
