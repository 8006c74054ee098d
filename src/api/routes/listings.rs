//! Marketplace listing intake

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::debug;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ApiResponse, NewListing, ok},
};
use crate::events::NewEvent;
use crate::storage::schema::{Listing, event_types, new_id};

/// POST /api/v1/listings
///
/// Stores the listing for the listing rules and records a `listing.create`
/// event for its creator.
pub async fn create_listing(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<NewListing>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Listing>>)> {
    if body.user_id.trim().is_empty() || body.title.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "userId and title are required".into(),
        ));
    }
    if body.price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        return Err(ApiError::InvalidRequest(
            "price must be a non-negative number".into(),
        ));
    }

    let listing = Listing {
        id: new_id(),
        user_id: body.user_id,
        title: body.title,
        description: body.description,
        price: body.price,
        category: body.category,
        created_at: Utc::now(),
    };
    state.storage.insert_listing(listing.clone()).await?;
    debug!("stored listing {} by {}", listing.id, listing.user_id);

    state
        .events
        .record(
            NewEvent::new(event_types::LISTING_CREATE)
                .user(listing.user_id.clone(), "user")
                .ip(addr.ip().to_string())
                .metadata("listingId", listing.id.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, ok(listing)))
}
