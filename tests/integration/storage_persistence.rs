//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Alerts, settings and anomalies survive a reopen of the SQLite file
//! - Deduplication still applies to alerts raised before a restart
//! - Storage can be selected from the hub configuration

use std::sync::Arc;

use chrono::NaiveDate;
use dairy_monitoring::alerts::{AlertCandidate, AlertManager};
use dairy_monitoring::config::parse_config;
use dairy_monitoring::monitors::milk::{MilkAnomalyDetector, MilkReading};
use dairy_monitoring::notifier::NoopNotifier;
use dairy_monitoring::settings::{Settings, keys};
use dairy_monitoring::storage::schema::{AlertType, Severity, TimeSlot};
use dairy_monitoring::storage::sqlite::SqliteBackend;
use dairy_monitoring::storage::{self, SharedStorage, StorageBackend};
use serde_json::json;
use tempfile::tempdir;

async fn open(path: &std::path::Path) -> SharedStorage {
    Arc::new(SqliteBackend::new(path).await.unwrap())
}

fn candidate(ip: &str) -> AlertCandidate {
    AlertCandidate::new(AlertType::BruteForce, Severity::High, "too many failed logins")
        .with("ip", ip)
        .with("attempts", 30)
}

#[tokio::test]
async fn test_alerts_dedupe_across_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");

    let first = {
        let storage = open(&db_path).await;
        let alerts = AlertManager::new(
            storage.clone(),
            Settings::new(storage.clone()),
            Arc::new(NoopNotifier),
        );
        let alert = alerts.raise(candidate("10.9.9.9")).await.unwrap().unwrap();
        storage.close().await.unwrap();
        alert
    };

    let storage = open(&db_path).await;
    let alerts = AlertManager::new(
        storage.clone(),
        Settings::new(storage.clone()),
        Arc::new(NoopNotifier),
    );

    let reloaded = alerts.get(&first.id).await.unwrap();
    assert_eq!(reloaded.fingerprint(), first.fingerprint());
    assert_eq!(reloaded.metadata["ip"], "10.9.9.9");
    assert!(alerts.raise(candidate("10.9.9.9")).await.unwrap().is_none());
    assert!(alerts.raise(candidate("10.9.9.10")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_settings_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");

    {
        let storage = open(&db_path).await;
        Settings::new(storage.clone())
            .set(keys::FAILED_LOGIN_THRESHOLD, json!(7))
            .await
            .unwrap();
        storage.close().await.unwrap();
    }

    let settings = Settings::new(open(&db_path).await);
    assert_eq!(settings.get_u64(keys::FAILED_LOGIN_THRESHOLD).await, 7);
    assert_eq!(settings.get_u64(keys::SPAM_LISTING_THRESHOLD).await, 5);
}

#[tokio::test]
async fn test_milk_anomaly_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");

    let reading = |litres: f64, day: u32| MilkReading {
        producer_id: "farmer-1".to_string(),
        litres,
        collection_date: NaiveDate::from_ymd_opt(2026, 4, day).unwrap(),
        time_slot: TimeSlot::Morning,
    };

    let anomaly_id = {
        let storage = open(&db_path).await;
        let settings = Settings::new(storage.clone());
        let alerts = AlertManager::new(storage.clone(), settings.clone(), Arc::new(NoopNotifier));
        let milk = MilkAnomalyDetector::new(storage.clone(), settings, alerts, Arc::new(NoopNotifier));

        milk.record_collection(reading(10.0, 1)).await.unwrap();
        let (_, anomaly) = milk.record_collection(reading(6.0, 2)).await.unwrap();
        storage.close().await.unwrap();
        anomaly.expect("40% decrease is flagged").id
    };

    let storage = open(&db_path).await;
    let stored = storage.get_milk_anomaly(&anomaly_id).await.unwrap().unwrap();
    assert_eq!(stored.producer_id, "farmer-1");
    assert_eq!(stored.anomaly_slots[&TimeSlot::Morning][0].litres, 6.0);
}

#[tokio::test]
async fn test_open_storage_from_config() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("from-config.db");

    let config = parse_config(
        &json!({
            "storage": { "backend": "sqlite", "path": db_path },
        })
        .to_string(),
    )
    .unwrap();

    let storage = storage::open(config.storage.as_ref().unwrap()).await.unwrap();
    assert!(storage.health_check().await.unwrap().healthy);
    assert!(db_path.exists());
}
