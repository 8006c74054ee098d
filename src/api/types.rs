//! Request and response bodies of the monitoring API
//!
//! Every successful response is wrapped in [`ApiResponse`]; failures are
//! rendered by [`ApiError`](super::ApiError) with the same `success` flag.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::schema::{EventFilter, MilkAnomaly, MilkRecord, Page};

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Wrap `data` in a successful JSON envelope
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::new(data))
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl EventQuery {
    pub fn split(self) -> (EventFilter, Page) {
        let page = Page::new(self.page, self.limit);
        let filter = EventFilter {
            event_type: self.event_type,
            user_id: self.user_id,
            ip: self.ip,
            from: self.from,
            to: self.to,
        };
        (filter, page)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertQuery {
    /// `open` when absent
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnomalyQuery {
    pub producer: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

// ============================================================================
// Bodies
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AlertActionRequest {
    pub action: String,
}

/// A listing as submitted by the marketplace
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewListing {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub storage: bool,
}

/// Dashboard counters, computed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub events_today: usize,
    pub failed_logins_past_hour: usize,
    pub open_alerts_today: usize,
    pub flagged_listings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MilkCollectionResponse {
    pub record: MilkRecord,
    pub anomaly: Option<MilkAnomaly>,
}
