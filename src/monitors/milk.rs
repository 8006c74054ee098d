//! Milk-volume anomaly detection
//!
//! Each new collection reading is compared to the average of the producer's
//! most recent prior readings. A deviation at or above the configured
//! percentage is recorded on the producer's anomaly for that day, one entry
//! per reading under its time slot, and raised as a `milk_anomaly` alert.
//!
//! Detection runs inline on the collection write path. It is auxiliary: a
//! failure is logged and never rolls back the stored reading.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::actors::messages::AnomalyResolved;
use crate::alerts::{AlertCandidate, AlertManager};
use crate::notifier::Notifier;
use crate::settings::{Settings, keys};
use crate::storage::schema::{
    AlertType, AnomalyAppend, AnomalyType, MilkAnomaly, MilkRecord, Severity, SlotEntry, TimeSlot,
    new_id,
};
use crate::storage::{SharedStorage, StorageError, StorageResult};

/// A collection reading as submitted by a porter or farmer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilkReading {
    pub producer_id: String,
    pub litres: f64,
    pub collection_date: NaiveDate,
    pub time_slot: TimeSlot,
}

/// Percentage deviation of `litres` from `average`, rounded to two decimals
///
/// With no meaningful average, any positive reading counts as a 100 %
/// deviation and a zero reading as none.
pub fn change_percent(litres: f64, average: f64) -> f64 {
    if average <= 0.0 {
        return if litres > 0.0 { 100.0 } else { 0.0 };
    }
    let percent = (litres - average).abs() / average * 100.0;
    (percent * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct MilkAnomalyDetector {
    storage: SharedStorage,
    settings: Settings,
    alerts: AlertManager,
    notifier: Arc<dyn Notifier>,
}

impl MilkAnomalyDetector {
    pub fn new(
        storage: SharedStorage,
        settings: Settings,
        alerts: AlertManager,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            settings,
            alerts,
            notifier,
        }
    }

    /// Persist a reading, then run detection on it
    #[instrument(skip(self, reading), fields(producer = %reading.producer_id))]
    pub async fn record_collection(
        &self,
        reading: MilkReading,
    ) -> StorageResult<(MilkRecord, Option<MilkAnomaly>)> {
        if !reading.litres.is_finite() || reading.litres <= 0.0 {
            return Err(StorageError::InvalidInput(format!(
                "litres must be a positive number, got {}",
                reading.litres
            )));
        }

        let record = MilkRecord {
            id: new_id(),
            producer_id: reading.producer_id.clone(),
            litres: reading.litres,
            collection_date: reading.collection_date,
            time_slot: reading.time_slot,
            recorded_at: Utc::now(),
        };
        self.storage.insert_milk_record(record.clone()).await?;
        debug!("stored milk record {}", record.id);

        let anomaly = match self.evaluate(&reading, Some(&record.id)).await {
            Ok(anomaly) => anomaly,
            Err(e) => {
                warn!("milk anomaly detection failed for record {}: {}", record.id, e);
                None
            }
        };

        Ok((record, anomaly))
    }

    /// Compare a reading with the producer's recent history
    ///
    /// `exclude_record_id` keeps an already persisted reading out of its own
    /// baseline. Returns the created or updated anomaly, if any.
    #[instrument(skip(self, reading), fields(producer = %reading.producer_id))]
    pub async fn evaluate(
        &self,
        reading: &MilkReading,
        exclude_record_id: Option<&str>,
    ) -> StorageResult<Option<MilkAnomaly>> {
        let window = self
            .settings
            .get_u64(keys::MILK_ANOMALY_WINDOW_SIZE)
            .await
            .clamp(1, 1000) as usize;
        let threshold = self
            .settings
            .get_f64(keys::MILK_ANOMALY_THRESHOLD_PERCENT)
            .await;

        let prior: Vec<MilkRecord> = self
            .storage
            .recent_milk_records(&reading.producer_id, window + 1)
            .await?
            .into_iter()
            .filter(|r| Some(r.id.as_str()) != exclude_record_id)
            .take(window)
            .collect();

        if prior.is_empty() {
            debug!("no prior readings, skipping");
            return Ok(None);
        }

        let average = prior.iter().map(|r| r.litres).sum::<f64>() / prior.len() as f64;
        let change = change_percent(reading.litres, average);

        if change < threshold {
            debug!("{change}% from average {average:.2} is below {threshold}%");
            return Ok(None);
        }

        let anomaly_type = if reading.litres > average {
            AnomalyType::Increase
        } else {
            AnomalyType::Decrease
        };
        let description = format!(
            "Milk volume {} by {:.2}% compared to the recent average of {:.2} litres",
            match anomaly_type {
                AnomalyType::Increase => "increased",
                AnomalyType::Decrease => "decreased",
            },
            change,
            average
        );

        let anomaly = self
            .storage
            .append_milk_anomaly_entry(AnomalyAppend {
                producer_id: reading.producer_id.clone(),
                anomaly_date: reading.collection_date,
                slot: reading.time_slot,
                entry: SlotEntry {
                    litres: reading.litres,
                    recorded_at: Utc::now(),
                    resolved: false,
                    resolved_at: None,
                },
                anomaly_type,
                description,
            })
            .await?;
        info!(
            "milk anomaly for {} on {}: {}",
            anomaly.producer_id, anomaly.anomaly_date, anomaly.description
        );

        let candidate = AlertCandidate::new(
            AlertType::MilkAnomaly,
            Severity::Medium,
            format!(
                "producer {}: {}",
                reading.producer_id, anomaly.description
            ),
        )
        .with("userId", reading.producer_id.clone())
        .with("changePercent", change)
        .with("average", (average * 100.0).round() / 100.0)
        .with("litres", reading.litres);

        if let Err(e) = self.alerts.raise(candidate).await {
            warn!("failed to raise milk anomaly alert: {}", e);
        }

        Ok(Some(anomaly))
    }

    /// Mark every unresolved entry of `slot` as resolved and notify the producer
    ///
    /// The notice goes to every configured notifier. On the monitor stream
    /// only admin sessions and the producer's own sessions receive it; the
    /// webhook, when configured, carries it to the marketplace.
    #[instrument(skip(self))]
    pub async fn resolve_slot(&self, anomaly_id: &str, slot: TimeSlot) -> StorageResult<MilkAnomaly> {
        let now = Utc::now();
        let (anomaly, flipped) = self
            .storage
            .resolve_milk_anomaly_slot(anomaly_id, slot, now)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("milk anomaly {anomaly_id}")))?;

        if !anomaly.anomaly_slots.contains_key(&slot) {
            return Err(StorageError::NotFound(format!(
                "{slot} slot of milk anomaly {anomaly_id}"
            )));
        }
        info!("resolved {flipped} {slot} entries of milk anomaly {anomaly_id}");

        let notice = AnomalyResolved {
            anomaly_id: anomaly.id.clone(),
            producer_id: anomaly.producer_id.clone(),
            anomaly_date: anomaly.anomaly_date,
            slot,
            entries_resolved: flipped,
            resolved_at: now,
        };
        if let Err(e) = self.notifier.anomaly_resolved(&notice).await {
            warn!("failed to notify producer {}: {:#}", anomaly.producer_id, e);
        }

        Ok(anomaly)
    }

    pub async fn list(&self, producer_id: Option<&str>) -> StorageResult<Vec<MilkAnomaly>> {
        self.storage.list_milk_anomalies(producer_id).await
    }

    /// Explicit admin cleanup; resolution never deletes
    pub async fn delete(&self, anomaly_id: &str) -> StorageResult<()> {
        if self.storage.delete_milk_anomaly(anomaly_id).await? {
            info!("deleted milk anomaly {anomaly_id}");
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("milk anomaly {anomaly_id}")))
        }
    }
}
