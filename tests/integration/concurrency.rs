//! Concurrency and race condition tests
//!
//! These tests verify that concurrent writers on the SQLite store never lose
//! milk anomaly slot entries:
//! - Many readings for one producer and day evaluated at once
//! - The first anomaly of a day created by racing readings
//! - A slot resolution overlapping new appends

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use dairy_monitoring::alerts::AlertManager;
use dairy_monitoring::monitors::milk::{MilkAnomalyDetector, MilkReading};
use dairy_monitoring::notifier::NoopNotifier;
use dairy_monitoring::settings::Settings;
use dairy_monitoring::storage::schema::{MilkRecord, TimeSlot, new_id};
use dairy_monitoring::storage::sqlite::SqliteBackend;
use dairy_monitoring::storage::{SharedStorage, StorageBackend};
use tempfile::TempDir;

const PRODUCER: &str = "farmer-11";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()
}

fn reading(litres: f64, slot: TimeSlot) -> MilkReading {
    MilkReading {
        producer_id: PRODUCER.to_string(),
        litres,
        collection_date: day(),
        time_slot: slot,
    }
}

/// SQLite-backed detector with three prior readings of 10 litres
async fn detector() -> (TempDir, SharedStorage, MilkAnomalyDetector) {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage: SharedStorage =
        Arc::new(SqliteBackend::new(temp_dir.path().join("concurrency.db")).await.unwrap());

    for offset in 1..=3 {
        storage
            .insert_milk_record(MilkRecord {
                id: new_id(),
                producer_id: PRODUCER.to_string(),
                litres: 10.0,
                collection_date: day() - Duration::days(offset),
                time_slot: TimeSlot::Morning,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let settings = Settings::new(storage.clone());
    let alerts = AlertManager::new(storage.clone(), settings.clone(), Arc::new(NoopNotifier));
    let detector = MilkAnomalyDetector::new(storage.clone(), settings, alerts, Arc::new(NoopNotifier));
    (temp_dir, storage, detector)
}

/// Evaluate `count` readings of `litres` in `slot` at the same time
fn spawn_evaluations(
    detector: &MilkAnomalyDetector,
    count: usize,
    litres: f64,
    slot: TimeSlot,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let detector = detector.clone();
            tokio::spawn(async move {
                let anomaly = detector.evaluate(&reading(litres, slot), None).await.unwrap();
                assert!(anomaly.is_some());
            })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_appends_keep_every_entry() {
    let (_dir, storage, detector) = detector().await;

    let seeded = detector
        .evaluate(&reading(50.0, TimeSlot::Evening), None)
        .await
        .unwrap()
        .unwrap();

    for task in spawn_evaluations(&detector, 32, 50.0, TimeSlot::Evening) {
        task.await.unwrap();
    }

    let anomalies = storage.list_milk_anomalies(Some(PRODUCER)).await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].id, seeded.id);
    assert_eq!(anomalies[0].anomaly_slots[&TimeSlot::Evening].len(), 33);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_racing_first_readings_create_one_anomaly() {
    let (_dir, storage, detector) = detector().await;

    for task in spawn_evaluations(&detector, 16, 2.0, TimeSlot::Afternoon) {
        task.await.unwrap();
    }

    let anomaly = storage
        .find_milk_anomaly(PRODUCER, day())
        .await
        .unwrap()
        .expect("anomaly created");
    assert_eq!(anomaly.anomaly_slots[&TimeSlot::Afternoon].len(), 16);
    assert_eq!(storage.list_milk_anomalies(None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_resolve_overlapping_appends_loses_nothing() {
    let (_dir, storage, detector) = detector().await;

    let anomaly = detector
        .evaluate(&reading(50.0, TimeSlot::Morning), None)
        .await
        .unwrap()
        .unwrap();

    let mut tasks = spawn_evaluations(&detector, 16, 50.0, TimeSlot::Morning);
    tasks.extend(spawn_evaluations(&detector, 16, 50.0, TimeSlot::Evening));
    for _ in 0..4 {
        let detector = detector.clone();
        let id = anomaly.id.clone();
        tasks.push(tokio::spawn(async move {
            detector.resolve_slot(&id, TimeSlot::Morning).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stored = storage.get_milk_anomaly(&anomaly.id).await.unwrap().unwrap();
    let morning = &stored.anomaly_slots[&TimeSlot::Morning];
    assert_eq!(morning.len(), 17);
    assert!(morning.iter().filter(|e| e.resolved).all(|e| e.resolved_at.is_some()));
    assert_eq!(stored.anomaly_slots[&TimeSlot::Evening].len(), 16);
    assert!(stored.anomaly_slots[&TimeSlot::Evening].iter().all(|e| !e.resolved));

    // Entries appended after the overlapping resolves are still resolvable
    let resolved = detector.resolve_slot(&anomaly.id, TimeSlot::Morning).await.unwrap();
    assert_eq!(resolved.anomaly_slots[&TimeSlot::Morning].len(), 17);
    assert!(resolved.anomaly_slots[&TimeSlot::Morning].iter().all(|e| e.resolved));
}
