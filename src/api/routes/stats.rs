//! Dashboard counters

use axum::{Json, extract::State};
use chrono::{Duration, Utc};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{ApiResponse, StatsResponse, ok},
};
use crate::storage::schema::{AlertFilter, AlertStatus, AlertType, EventFilter, event_types};

/// GET /api/v1/monitor/stats
///
/// Counts are computed from the stores on every request. "Today" starts at
/// midnight UTC.
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<ApiResponse<StatsResponse>>> {
    let now = Utc::now();
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now);

    let events_today = state
        .events
        .count(&EventFilter {
            from: Some(today),
            ..Default::default()
        })
        .await?;

    let failed_logins_past_hour = state
        .events
        .count(&EventFilter {
            event_type: Some(event_types::LOGIN_FAIL.to_string()),
            from: Some(now - Duration::hours(1)),
            ..Default::default()
        })
        .await?;

    let open_alerts_today = state
        .alerts
        .count(&AlertFilter {
            status: Some(AlertStatus::Open),
            since: Some(today),
            ..Default::default()
        })
        .await?;

    let flagged_listings = state
        .alerts
        .count(&AlertFilter {
            not_closed: true,
            types: AlertType::LISTING_TYPES.to_vec(),
            ..Default::default()
        })
        .await?;

    Ok(ok(StatsResponse {
        events_today,
        failed_logins_past_hour,
        open_alerts_today,
        flagged_listings,
    }))
}
