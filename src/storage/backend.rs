//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    Alert, AlertFilter, AlertStatus, AlertType, AnomalyAppend, ConfigEntry, CreatorCount, Event,
    EventFilter, IpCount, Listing, MilkAnomaly, MilkRecord, Page, Session, TimeSlot,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for the stores shared by API handlers and the monitor worker
///
/// The trait covers the event log, alerts, runtime settings, the
/// collaborator records the rules read (listings, milk records), milk
/// anomalies and monitor sessions.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; a single instance is shared
/// behind an `Arc` by many request handlers and one worker loop. No
/// operation assumes a lock is held across calls: every write is an
/// independent append, an idempotent upsert, or a whole-record replace.
///
/// ## Ordering
///
/// Unless stated otherwise, list operations return newest records first.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Events
    // ========================================================================

    /// Append an event
    async fn insert_event(&self, event: Event) -> StorageResult<()>;

    /// Page through events matching `filter`, newest first
    async fn query_events(&self, filter: &EventFilter, page: Page) -> StorageResult<Vec<Event>>;

    /// Count events matching `filter`
    async fn count_events(&self, filter: &EventFilter) -> StorageResult<usize>;

    /// Count events of `event_type` since `since`, grouped by ip
    ///
    /// Events without an ip are not counted.
    async fn count_events_by_ip(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<IpCount>>;

    // ========================================================================
    // Alerts
    // ========================================================================

    async fn insert_alert(&self, alert: Alert) -> StorageResult<()>;

    /// Find a non-closed alert with this fingerprint and type created at or after `since`
    async fn find_open_alert(
        &self,
        fingerprint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Alert>>;

    async fn get_alert(&self, id: &str) -> StorageResult<Option<Alert>>;

    /// Page through alerts with `status`, newest first
    async fn list_alerts(&self, status: AlertStatus, page: Page) -> StorageResult<Vec<Alert>>;

    async fn count_alerts(&self, filter: &AlertFilter) -> StorageResult<usize>;

    /// Replace a stored alert (status, severity, resolution time)
    async fn update_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Returns `true` if an alert was deleted
    async fn delete_alert(&self, id: &str) -> StorageResult<bool>;

    // ========================================================================
    // Runtime settings
    // ========================================================================

    async fn get_setting(&self, key: &str) -> StorageResult<Option<ConfigEntry>>;

    /// Insert or replace a setting by key
    async fn put_setting(&self, entry: ConfigEntry) -> StorageResult<()>;

    /// All stored settings ordered by key
    async fn list_settings(&self) -> StorageResult<Vec<ConfigEntry>>;

    // ========================================================================
    // Listings
    // ========================================================================

    async fn insert_listing(&self, listing: Listing) -> StorageResult<()>;

    /// The `limit` most recently created listings, newest first
    async fn recent_listings(&self, limit: usize) -> StorageResult<Vec<Listing>>;

    /// Listings created at or after `since`, newest first
    async fn listings_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<Listing>>;

    /// Count listings created at or after `since`, grouped by creator
    async fn count_listings_by_creator(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<CreatorCount>>;

    // ========================================================================
    // Milk records & anomalies
    // ========================================================================

    async fn insert_milk_record(&self, record: MilkRecord) -> StorageResult<()>;

    /// The `limit` most recent records of a producer by collection date (then
    /// insertion time), newest first
    async fn recent_milk_records(
        &self,
        producer_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MilkRecord>>;

    /// Anomaly for a producer on a given day, if any
    async fn find_milk_anomaly(
        &self,
        producer_id: &str,
        date: chrono::NaiveDate,
    ) -> StorageResult<Option<MilkAnomaly>>;

    async fn get_milk_anomaly(&self, id: &str) -> StorageResult<Option<MilkAnomaly>>;

    /// Append an entry to the anomaly of (producer, date), creating it if
    /// absent, and return the anomaly as stored afterwards
    ///
    /// Concurrent appends and resolves on the same anomaly must all survive:
    /// implementations never rewrite existing entries here.
    async fn append_milk_anomaly_entry(&self, append: AnomalyAppend)
    -> StorageResult<MilkAnomaly>;

    /// Flip every unresolved entry of `slot` to resolved at `at`
    ///
    /// Returns the anomaly and the number of entries flipped, or `None` if
    /// no anomaly has this id.
    async fn resolve_milk_anomaly_slot(
        &self,
        id: &str,
        slot: TimeSlot,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<(MilkAnomaly, usize)>>;

    /// Anomalies ordered by date, newest first, optionally for one producer
    async fn list_milk_anomalies(&self, producer_id: Option<&str>)
    -> StorageResult<Vec<MilkAnomaly>>;

    async fn delete_milk_anomaly(&self, id: &str) -> StorageResult<bool>;

    // ========================================================================
    // Sessions
    // ========================================================================

    async fn insert_session(&self, session: Session) -> StorageResult<()>;

    /// Returns `true` if a session with this connection id existed
    async fn remove_session(&self, connection_id: &str) -> StorageResult<bool>;

    /// Active sessions, most recently connected first
    async fn list_sessions(&self) -> StorageResult<Vec<Session>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
