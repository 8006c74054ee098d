//! Runtime settings

use axum::{Json, extract::State};
use serde_json::{Map, Value};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ApiResponse, ok},
};
use crate::settings::SettingView;
use crate::storage::schema::ConfigEntry;

/// GET /api/v1/config
///
/// Every known setting, with compiled defaults for keys never stored
pub async fn list_config(
    State(state): State<ApiState>,
) -> ApiResult<Json<ApiResponse<Vec<SettingView>>>> {
    Ok(ok(state.settings.list().await?))
}

/// PUT /api/v1/config
///
/// Body is an object of key to value; every pair is upserted.
pub async fn update_config(
    State(state): State<ApiState>,
    Json(values): Json<Map<String, Value>>,
) -> ApiResult<Json<ApiResponse<Vec<ConfigEntry>>>> {
    if values.keys().any(|key| key.trim().is_empty()) {
        return Err(ApiError::InvalidRequest("setting keys must not be empty".into()));
    }
    Ok(ok(state.settings.set_many(values).await?))
}
