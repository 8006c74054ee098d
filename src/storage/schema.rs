//! Record definitions for the monitoring pipeline
//!
//! ## Design Philosophy
//!
//! Records that the pipeline queries by field (type, ip, creator, producer)
//! keep those fields as typed columns. Free-form payloads (event metadata,
//! alert metadata, anomaly slots) are stored as JSON so collaborators can
//! attach context without a migration.
//!
//! Identifiers are UUID v4 strings generated on construction.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form key/value payload attached to events and alerts
pub type Metadata = Map<String, Value>;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Events
// ============================================================================

/// A domain occurrence reported by any collaborator (login attempt, listing
/// created, ...). Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Dotted taxonomy string, e.g. `auth.login.fail`
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Well-known event types the rules look for
pub mod event_types {
    pub const LOGIN_FAIL: &str = "auth.login.fail";
    pub const LOGIN_SUCCESS: &str = "auth.login.success";
    pub const LISTING_CREATE: &str = "listing.create";
}

/// Filter for event queries. All fields are optional and combined with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.event_type
            .as_ref()
            .is_none_or(|t| *t == event.event_type)
            && self
                .user_id
                .as_ref()
                .is_none_or(|u| event.user_id.as_ref() == Some(u))
            && self.ip.as_ref().is_none_or(|ip| event.ip.as_ref() == Some(ip))
            && self.from.is_none_or(|from| event.created_at >= from)
            && self.to.is_none_or(|to| event.created_at <= to)
    }
}

/// Number of events observed from one ip address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: usize,
}

// ============================================================================
// Pagination
// ============================================================================

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;

/// 1-based page selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        ((self.page - 1) as usize) * self.limit as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// ============================================================================
// Config entries
// ============================================================================

/// A runtime-tunable setting stored by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BruteForce,
    SpamListing,
    DuplicateListing,
    SuspiciousActivity,
    AbnormalPrice,
    MilkAnomaly,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BruteForce => "brute_force",
            AlertType::SpamListing => "spam_listing",
            AlertType::DuplicateListing => "duplicate_listing",
            AlertType::SuspiciousActivity => "suspicious_activity",
            AlertType::AbnormalPrice => "abnormal_price",
            AlertType::MilkAnomaly => "milk_anomaly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "brute_force" => Some(AlertType::BruteForce),
            "spam_listing" => Some(AlertType::SpamListing),
            "duplicate_listing" => Some(AlertType::DuplicateListing),
            "suspicious_activity" => Some(AlertType::SuspiciousActivity),
            "abnormal_price" => Some(AlertType::AbnormalPrice),
            "milk_anomaly" => Some(AlertType::MilkAnomaly),
            _ => None,
        }
    }

    /// Alert types that flag a marketplace listing
    pub const LISTING_TYPES: [AlertType; 3] = [
        AlertType::SpamListing,
        AlertType::DuplicateListing,
        AlertType::AbnormalPrice,
    ];
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

/// Alert lifecycle status
///
/// ```text
/// open ──► reviewing ──► closed
///   └────────────────────▲
/// ```
///
/// `closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Reviewing,
    Closed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Reviewing => "reviewing",
            AlertStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(AlertStatus::Open),
            "reviewing" => Some(AlertStatus::Reviewing),
            "closed" => Some(AlertStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    /// Always contains a `fingerprint` string
    pub metadata: Metadata,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn fingerprint(&self) -> Option<&str> {
        self.metadata.get("fingerprint").and_then(Value::as_str)
    }
}

/// Filter for counting alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    /// When set, matches any status except `closed`
    pub not_closed: bool,
    pub types: Vec<AlertType>,
    pub since: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.is_none_or(|s| alert.status == s)
            && (!self.not_closed || alert.status != AlertStatus::Closed)
            && (self.types.is_empty() || self.types.contains(&alert.alert_type))
            && self.since.is_none_or(|since| alert.created_at >= since)
    }
}

// ============================================================================
// Listings (collaborator records read by the rules)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    /// Creator of the listing
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default)]
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Number of listings created by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorCount {
    pub user_id: String,
    pub count: usize,
}

// ============================================================================
// Milk collection & anomalies
// ============================================================================

/// Collection time slot. Closed set so anomaly slots stay statically checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "morning" => Some(TimeSlot::Morning),
            "afternoon" => Some(TimeSlot::Afternoon),
            "evening" => Some(TimeSlot::Evening),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted milk-volume reading for one producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilkRecord {
    pub id: String,
    pub producer_id: String,
    pub litres: f64,
    pub collection_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    Increase,
    Decrease,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Increase => "Increase",
            AnomalyType::Decrease => "Decrease",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Increase" => Some(AnomalyType::Increase),
            "Decrease" => Some(AnomalyType::Decrease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEntry {
    pub litres: f64,
    pub recorded_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Flagged deviation for a producer on one day, keyed by (producer, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilkAnomaly {
    pub id: String,
    pub producer_id: String,
    pub anomaly_date: NaiveDate,
    pub anomaly_type: AnomalyType,
    pub description: String,
    pub anomaly_slots: BTreeMap<TimeSlot, Vec<SlotEntry>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One anomalous reading to add to the anomaly of (producer, date)
///
/// The anomaly is created on first append; later appends replace its type
/// and description with the latest reading's.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyAppend {
    pub producer_id: String,
    pub anomaly_date: NaiveDate,
    pub slot: TimeSlot,
    pub entry: SlotEntry,
    pub anomaly_type: AnomalyType,
    pub description: String,
}

// ============================================================================
// Sessions
// ============================================================================

/// A live real-time connection of a monitor client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub role: String,
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
