//! Monitor worker control

use axum::{Json, extract::State};

use crate::actors::messages::{MonitorStatus, TickReport};
use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{ApiResponse, ok},
};

/// POST /api/v1/monitor/run
pub async fn run_now(State(state): State<ApiState>) -> ApiResult<Json<ApiResponse<TickReport>>> {
    Ok(ok(state.monitor.run_now().await?))
}

/// GET /api/v1/monitor/status
pub async fn status(State(state): State<ApiState>) -> ApiResult<Json<ApiResponse<MonitorStatus>>> {
    Ok(ok(state.monitor.status().await?))
}
