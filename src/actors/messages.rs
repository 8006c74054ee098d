//! Message types for actor communication
//!
//! This module defines all message types used for communication between the
//! monitor worker, the notifier and the real-time stream.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the worker via mpsc
//! 2. **Events**: Broadcast notifications published to every monitor session
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::sessions::ADMIN_ROLE;
use crate::storage::schema::{Alert, Session, TimeSlot};

/// Event pushed to monitor clients
///
/// Serialized as `{"event": "alert:new", "data": {...}}`. The broadcast
/// channel may lag or drop messages for slow subscribers; clients re-read
/// the alert list after reconnecting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum MonitorEvent {
    #[serde(rename = "alert:new")]
    AlertNew(Alert),

    #[serde(rename = "anomaly:resolved")]
    AnomalyResolved(AnomalyResolved),
}

impl MonitorEvent {
    /// Whether a monitor session should receive this event
    ///
    /// Admin sessions see everything. Any other session only receives the
    /// resolution notices addressed to its own user id.
    pub fn is_visible_to(&self, session: &Session) -> bool {
        if session.role == ADMIN_ROLE {
            return true;
        }
        match self {
            MonitorEvent::AlertNew(_) => false,
            MonitorEvent::AnomalyResolved(notice) => notice.producer_id == session.user_id,
        }
    }
}

/// A milk anomaly slot was resolved by an admin; addressed to the producer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResolved {
    pub anomaly_id: String,
    pub producer_id: String,
    pub anomaly_date: NaiveDate,
    pub slot: TimeSlot,
    /// Number of slot entries flipped to resolved
    pub entries_resolved: usize,
    pub resolved_at: DateTime<Utc>,
}

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a tick immediately (bypassing the interval timer)
    ///
    /// The timer is not reset; the next scheduled tick still fires.
    RunNow {
        respond_to: oneshot::Sender<TickReport>,
    },

    /// Get the worker's current status
    GetStatus {
        respond_to: oneshot::Sender<MonitorStatus>,
    },

    /// Gracefully shut down the worker
    ///
    /// A tick in progress completes first; the sender is notified once the
    /// loop has exited.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Outcome of one rule within a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub rule: String,
    pub candidates: usize,
    pub raised: usize,
    pub suppressed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one worker tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rules_run: usize,
    pub rules_failed: usize,
    pub alerts_raised: usize,
    pub alerts_suppressed: usize,
    pub rules: Vec<RuleOutcome>,
}

/// Worker statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    /// Number of ticks completed since start
    pub ticks: u64,

    /// Interval currently in effect
    pub interval_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<TickReport>,
}
