//! Alert listing and lifecycle

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::Value;

use crate::alerts::AlertAction;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertActionRequest, AlertQuery, ApiResponse, ok},
};
use crate::storage::schema::{Alert, AlertStatus, Page};

/// GET /api/v1/alerts
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Alert>>>> {
    let status = match query.status.as_deref() {
        None => AlertStatus::Open,
        Some(raw) => AlertStatus::parse(raw)
            .ok_or_else(|| ApiError::InvalidRequest(format!("unknown alert status '{}'", raw)))?,
    };

    let alerts = state
        .alerts
        .list(status, Page::new(query.page, query.limit))
        .await?;
    Ok(ok(alerts))
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Alert>>> {
    Ok(ok(state.alerts.get(&id).await?))
}

/// PATCH /api/v1/alerts/:id
pub async fn update_alert(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<AlertActionRequest>,
) -> ApiResult<Json<ApiResponse<Alert>>> {
    let action: AlertAction = serde_json::from_value(Value::String(request.action.clone()))
        .map_err(|_| ApiError::InvalidRequest(format!("unknown action '{}'", request.action)))?;

    Ok(ok(state.alerts.apply(&id, action).await?))
}

/// DELETE /api/v1/alerts/:id
pub async fn delete_alert(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<String>>> {
    state.alerts.delete(&id).await?;
    Ok(ok(id))
}
