//! Milk collection intake and anomaly review

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AnomalyQuery, ApiResponse, MilkCollectionResponse, ok},
};
use crate::monitors::milk::MilkReading;
use crate::storage::schema::{MilkAnomaly, TimeSlot};

/// POST /api/v1/milk
pub async fn record_collection(
    State(state): State<ApiState>,
    Json(reading): Json<MilkReading>,
) -> ApiResult<(StatusCode, Json<ApiResponse<MilkCollectionResponse>>)> {
    if reading.producer_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("producerId is required".into()));
    }

    let (record, anomaly) = state.milk.record_collection(reading).await?;
    Ok((
        StatusCode::CREATED,
        ok(MilkCollectionResponse { record, anomaly }),
    ))
}

/// GET /api/v1/milk/anomalies
pub async fn list_anomalies(
    State(state): State<ApiState>,
    Query(query): Query<AnomalyQuery>,
) -> ApiResult<Json<ApiResponse<Vec<MilkAnomaly>>>> {
    Ok(ok(state.milk.list(query.producer.as_deref()).await?))
}

/// POST /api/v1/milk/anomalies/:id/slots/:slot/resolve
pub async fn resolve_slot(
    State(state): State<ApiState>,
    Path((id, slot)): Path<(String, String)>,
) -> ApiResult<Json<ApiResponse<MilkAnomaly>>> {
    let slot = TimeSlot::parse(&slot)
        .ok_or_else(|| ApiError::InvalidRequest(format!("unknown time slot '{}'", slot)))?;

    Ok(ok(state.milk.resolve_slot(&id, slot).await?))
}

/// DELETE /api/v1/milk/anomalies/:id
pub async fn delete_anomaly(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<String>>> {
    state.milk.delete(&id).await?;
    Ok(ok(id))
}
