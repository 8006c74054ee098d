//! Append-only event log
//!
//! Collaborators report domain occurrences (failed logins, listing creation,
//! ...) through [`EventLog::record`]. Recording is auxiliary to the action
//! that produced the event, so it never fails the caller: storage errors are
//! logged and the event is dropped.

use chrono::Utc;
use serde::Deserialize;
use tracing::{instrument, trace, warn};

use crate::storage::schema::{Event, EventFilter, Metadata, Page, new_id};
use crate::storage::{SharedStorage, StorageResult};

/// An event as submitted by a collaborator, before id and timestamp are assigned
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>, role: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.role = Some(role.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone)]
pub struct EventLog {
    storage: SharedStorage,
}

impl EventLog {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Append an event, returning the stored record
    ///
    /// Returns `None` when the store rejected the write; the failure is logged.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn record(&self, event: NewEvent) -> Option<Event> {
        let event = Event {
            id: new_id(),
            user_id: event.user_id,
            role: event.role,
            event_type: event.event_type,
            ip: event.ip,
            user_agent: event.user_agent,
            metadata: event.metadata,
            created_at: Utc::now(),
        };

        match self.storage.insert_event(event.clone()).await {
            Ok(()) => {
                trace!("recorded event {}", event.id);
                Some(event)
            }
            Err(e) => {
                warn!("failed to record event: {}", e);
                None
            }
        }
    }

    /// Page through events matching `filter`, newest first
    pub async fn query(&self, filter: &EventFilter, page: Page) -> StorageResult<Vec<Event>> {
        self.storage.query_events(filter, page).await
    }

    pub async fn count(&self, filter: &EventFilter) -> StorageResult<usize> {
        self.storage.count_events(filter).await
    }
}
