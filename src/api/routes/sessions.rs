//! Monitor session administration

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ApiResponse, ok},
};
use crate::storage::schema::Session;

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<ApiState>,
) -> ApiResult<Json<ApiResponse<Vec<Session>>>> {
    Ok(ok(state.sessions.list().await?))
}

/// DELETE /api/v1/sessions/:connection_id
pub async fn terminate_session(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<ApiResponse<String>>> {
    if !state.sessions.terminate(&connection_id).await? {
        return Err(ApiError::NotFound(format!(
            "session {} not found",
            connection_id
        )));
    }
    Ok(ok(connection_id))
}
