//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments that configure `"backend": "none"`
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Linear scans**: Queries walk the full collection

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertFilter, AlertStatus, AlertType, AnomalyAppend, ConfigEntry, CreatorCount, Event,
    EventFilter, IpCount, Listing, MilkAnomaly, MilkRecord, Page, Session, TimeSlot, new_id,
};

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    alerts: Vec<Alert>,
    settings: BTreeMap<String, ConfigEntry>,
    listings: Vec<Listing>,
    milk_records: Vec<MilkRecord>,
    anomalies: HashMap<String, MilkAnomaly>,
    sessions: HashMap<String, Session>,
}

/// In-memory storage backend
///
/// Records are appended in insertion order; "newest first" queries sort by
/// the record timestamp so callers may insert back-dated records.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(items: Vec<&T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset())
        .take(page.limit as usize)
        .cloned()
        .collect()
}

fn grouped<K: Ord>(keys: impl Iterator<Item = K>) -> BTreeMap<K, usize> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_event(&self, event: Event) -> StorageResult<()> {
        self.state.write().await.events.push(event);
        Ok(())
    }

    async fn query_events(&self, filter: &EventFilter, page: Page) -> StorageResult<Vec<Event>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Event> = state.events.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, page))
    }

    async fn count_events(&self, filter: &EventFilter) -> StorageResult<usize> {
        let state = self.state.read().await;
        Ok(state.events.iter().filter(|e| filter.matches(e)).count())
    }

    async fn count_events_by_ip(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<IpCount>> {
        let state = self.state.read().await;
        let counts = grouped(
            state
                .events
                .iter()
                .filter(|e| e.event_type == event_type && e.created_at >= since)
                .filter_map(|e| e.ip.clone()),
        );

        Ok(counts
            .into_iter()
            .map(|(ip, count)| IpCount { ip, count })
            .collect())
    }

    async fn insert_alert(&self, alert: Alert) -> StorageResult<()> {
        self.state.write().await.alerts.push(alert);
        Ok(())
    }

    async fn find_open_alert(
        &self,
        fingerprint: &str,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Alert>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .iter()
            .filter(|a| {
                a.alert_type == alert_type
                    && a.status != AlertStatus::Closed
                    && a.created_at >= since
                    && a.fingerprint() == Some(fingerprint)
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn get_alert(&self, id: &str) -> StorageResult<Option<Alert>> {
        let state = self.state.read().await;
        Ok(state.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list_alerts(&self, status: AlertStatus, page: Page) -> StorageResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Alert> = state.alerts.iter().filter(|a| a.status == status).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, page))
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> StorageResult<usize> {
        let state = self.state.read().await;
        Ok(state.alerts.iter().filter(|a| filter.matches(a)).count())
    }

    async fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match state.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(stored) => {
                *stored = alert.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("alert {}", alert.id))),
        }
    }

    async fn delete_alert(&self, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let before = state.alerts.len();
        state.alerts.retain(|a| a.id != id);
        Ok(state.alerts.len() != before)
    }

    async fn get_setting(&self, key: &str) -> StorageResult<Option<ConfigEntry>> {
        Ok(self.state.read().await.settings.get(key).cloned())
    }

    async fn put_setting(&self, entry: ConfigEntry) -> StorageResult<()> {
        debug!("storing setting {}", entry.key);
        let mut state = self.state.write().await;
        let description = entry.description.clone().or_else(|| {
            state
                .settings
                .get(&entry.key)
                .and_then(|existing| existing.description.clone())
        });
        state
            .settings
            .insert(entry.key.clone(), ConfigEntry { description, ..entry });
        Ok(())
    }

    async fn list_settings(&self) -> StorageResult<Vec<ConfigEntry>> {
        Ok(self.state.read().await.settings.values().cloned().collect())
    }

    async fn insert_listing(&self, listing: Listing) -> StorageResult<()> {
        self.state.write().await.listings.push(listing);
        Ok(())
    }

    async fn recent_listings(&self, limit: usize) -> StorageResult<Vec<Listing>> {
        let state = self.state.read().await;
        let mut listings: Vec<&Listing> = state.listings.iter().collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings.into_iter().take(limit).cloned().collect())
    }

    async fn listings_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<Listing>> {
        let state = self.state.read().await;
        let mut listings: Vec<&Listing> = state
            .listings
            .iter()
            .filter(|l| l.created_at >= since)
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings.into_iter().cloned().collect())
    }

    async fn count_listings_by_creator(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<CreatorCount>> {
        let state = self.state.read().await;
        let counts = grouped(
            state
                .listings
                .iter()
                .filter(|l| l.created_at >= since)
                .map(|l| l.user_id.clone()),
        );

        Ok(counts
            .into_iter()
            .map(|(user_id, count)| CreatorCount { user_id, count })
            .collect())
    }

    async fn insert_milk_record(&self, record: MilkRecord) -> StorageResult<()> {
        self.state.write().await.milk_records.push(record);
        Ok(())
    }

    async fn recent_milk_records(
        &self,
        producer_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MilkRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<&MilkRecord> = state
            .milk_records
            .iter()
            .filter(|r| r.producer_id == producer_id)
            .collect();
        records.sort_by(|a, b| {
            b.collection_date
                .cmp(&a.collection_date)
                .then(b.recorded_at.cmp(&a.recorded_at))
        });
        Ok(records.into_iter().take(limit).cloned().collect())
    }

    async fn find_milk_anomaly(
        &self,
        producer_id: &str,
        date: NaiveDate,
    ) -> StorageResult<Option<MilkAnomaly>> {
        let state = self.state.read().await;
        Ok(state
            .anomalies
            .values()
            .find(|a| a.producer_id == producer_id && a.anomaly_date == date)
            .cloned())
    }

    async fn get_milk_anomaly(&self, id: &str) -> StorageResult<Option<MilkAnomaly>> {
        Ok(self.state.read().await.anomalies.get(id).cloned())
    }

    async fn append_milk_anomaly_entry(
        &self,
        append: AnomalyAppend,
    ) -> StorageResult<MilkAnomaly> {
        let mut state = self.state.write().await;
        let now = append.entry.recorded_at;

        let existing = state
            .anomalies
            .values()
            .find(|a| a.producer_id == append.producer_id && a.anomaly_date == append.anomaly_date)
            .map(|a| a.id.clone());
        let id = match existing {
            Some(id) => id,
            None => {
                let id = new_id();
                state.anomalies.insert(
                    id.clone(),
                    MilkAnomaly {
                        id: id.clone(),
                        producer_id: append.producer_id.clone(),
                        anomaly_date: append.anomaly_date,
                        anomaly_type: append.anomaly_type,
                        description: String::new(),
                        anomaly_slots: BTreeMap::new(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };

        let anomaly = state
            .anomalies
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("milk anomaly {id}")))?;
        anomaly
            .anomaly_slots
            .entry(append.slot)
            .or_default()
            .push(append.entry);
        anomaly.anomaly_type = append.anomaly_type;
        anomaly.description = append.description;
        anomaly.updated_at = now;

        Ok(anomaly.clone())
    }

    async fn resolve_milk_anomaly_slot(
        &self,
        id: &str,
        slot: TimeSlot,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<(MilkAnomaly, usize)>> {
        let mut state = self.state.write().await;
        let Some(anomaly) = state.anomalies.get_mut(id) else {
            return Ok(None);
        };

        let mut flipped = 0;
        if let Some(entries) = anomaly.anomaly_slots.get_mut(&slot) {
            for entry in entries.iter_mut().filter(|e| !e.resolved) {
                entry.resolved = true;
                entry.resolved_at = Some(at);
                flipped += 1;
            }
        }
        if flipped > 0 {
            anomaly.updated_at = at;
        }

        Ok(Some((anomaly.clone(), flipped)))
    }

    async fn list_milk_anomalies(
        &self,
        producer_id: Option<&str>,
    ) -> StorageResult<Vec<MilkAnomaly>> {
        let state = self.state.read().await;
        let mut anomalies: Vec<&MilkAnomaly> = state
            .anomalies
            .values()
            .filter(|a| producer_id.is_none_or(|p| a.producer_id == p))
            .collect();
        anomalies.sort_by(|a, b| {
            b.anomaly_date
                .cmp(&a.anomaly_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(anomalies.into_iter().cloned().collect())
    }

    async fn delete_milk_anomaly(&self, id: &str) -> StorageResult<bool> {
        Ok(self.state.write().await.anomalies.remove(id).is_some())
    }

    async fn insert_session(&self, session: Session) -> StorageResult<()> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.connection_id.clone(), session);
        Ok(())
    }

    async fn remove_session(&self, connection_id: &str) -> StorageResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .sessions
            .remove(connection_id)
            .is_some())
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        Ok(sessions)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("events".to_string(), state.events.len().to_string()),
                ("alerts".to_string(), state.alerts.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
