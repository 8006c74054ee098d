//! Event intake and audit queries

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{ApiResponse, EventQuery, ok},
};
use crate::events::NewEvent;
use crate::storage::schema::Event;

/// POST /api/v1/events
///
/// Fire-and-forget: the event is accepted even if it could not be stored,
/// in which case `data` is null.
pub async fn record_event(
    State(state): State<ApiState>,
    Json(event): Json<NewEvent>,
) -> (StatusCode, Json<ApiResponse<Option<Event>>>) {
    let stored = state.events.record(event).await;
    (StatusCode::ACCEPTED, ok(stored))
}

/// GET /api/v1/events
pub async fn query_events(
    State(state): State<ApiState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Event>>>> {
    let (filter, page) = query.split();
    let events = state.events.query(&filter, page).await?;
    Ok(ok(events))
}
