//! End-to-end tests of the detection pipeline
//!
//! These tests verify that:
//! - Reported events become deduplicated alerts through the monitor worker
//! - New alerts reach monitor subscribers
//! - Milk anomalies are raised inline and their resolution is pushed
//! - Tuned settings are honoured by the next tick

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use dairy_monitoring::actors::MonitorHandle;
use dairy_monitoring::actors::messages::MonitorEvent;
use dairy_monitoring::alerts::{AlertAction, AlertError, AlertManager};
use dairy_monitoring::events::EventLog;
use dairy_monitoring::monitors::milk::{MilkAnomalyDetector, MilkReading};
use dairy_monitoring::monitors::rules::default_rules;
use dairy_monitoring::notifier::BroadcastNotifier;
use dairy_monitoring::settings::{Settings, keys};
use dairy_monitoring::storage::schema::{AlertStatus, AlertType, AnomalyType, Page, TimeSlot};
use dairy_monitoring::storage::{SharedStorage, StorageBackend};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;

use crate::helpers::{listing, memory_storage, record_failed_logins};

struct Pipeline {
    storage: SharedStorage,
    events: EventLog,
    settings: Settings,
    alerts: AlertManager,
    milk: MilkAnomalyDetector,
    monitor: MonitorHandle,
    rx: broadcast::Receiver<MonitorEvent>,
}

fn pipeline() -> Pipeline {
    let storage = memory_storage();
    let broadcast = Arc::new(BroadcastNotifier::new(64));
    let rx = broadcast.subscribe();

    let settings = Settings::new(storage.clone());
    let alerts = AlertManager::new(storage.clone(), settings.clone(), broadcast.clone());
    let milk = MilkAnomalyDetector::new(
        storage.clone(),
        settings.clone(),
        alerts.clone(),
        broadcast,
    );
    let monitor = MonitorHandle::spawn(
        storage.clone(),
        settings.clone(),
        alerts.clone(),
        default_rules(),
    );

    Pipeline {
        events: EventLog::new(storage.clone()),
        storage,
        settings,
        alerts,
        milk,
        monitor,
        rx,
    }
}

fn reading(litres: f64, day: u32, slot: TimeSlot) -> MilkReading {
    MilkReading {
        producer_id: "farmer-7".to_string(),
        litres,
        collection_date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        time_slot: slot,
    }
}

#[tokio::test]
async fn test_brute_force_alert_is_pushed_once() {
    let mut p = pipeline();
    record_failed_logins(&p.events, "10.1.1.1", 21).await;

    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.alerts_raised, 1);

    let event = p.rx.recv().await.unwrap();
    assert_matches!(event, MonitorEvent::AlertNew(alert) => {
        assert_eq!(alert.alert_type, AlertType::BruteForce);
        assert_eq!(alert.metadata["ip"], "10.1.1.1");
    });

    // Same fingerprint within the dedupe window
    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.alerts_raised, 0);
    assert_eq!(report.alerts_suppressed, 1);
    assert!(p.rx.try_recv().is_err());

    let open = p.alerts.list(AlertStatus::Open, Page::default()).await.unwrap();
    assert_eq!(open.len(), 1);

    p.monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_alert_allows_new_alert_and_rejects_actions() {
    let p = pipeline();
    record_failed_logins(&p.events, "10.2.2.2", 25).await;
    p.monitor.run_now().await.unwrap();

    let alert = p
        .alerts
        .list(AlertStatus::Open, Page::default())
        .await
        .unwrap()
        .remove(0);

    let reviewing = p.alerts.apply(&alert.id, AlertAction::Reviewing).await.unwrap();
    assert_eq!(reviewing.status, AlertStatus::Reviewing);

    let closed = p.alerts.apply(&alert.id, AlertAction::Close).await.unwrap();
    assert_eq!(closed.status, AlertStatus::Closed);
    assert!(closed.resolved_at.is_some());

    for action in [AlertAction::Reviewing, AlertAction::Close, AlertAction::Escalate] {
        assert_matches!(
            p.alerts.apply(&alert.id, action).await,
            Err(AlertError::AlreadyClosed(_))
        );
    }

    // A closed alert no longer suppresses its fingerprint
    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.alerts_raised, 1);
}

#[tokio::test]
async fn test_threshold_override_applies_on_next_tick() {
    let p = pipeline();
    record_failed_logins(&p.events, "10.3.3.3", 5).await;

    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.alerts_raised, 0);

    p.settings
        .set(keys::FAILED_LOGIN_THRESHOLD, json!(4))
        .await
        .unwrap();

    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.alerts_raised, 1);
}

#[tokio::test]
async fn test_spam_and_duplicate_listings() {
    let p = pipeline();
    for i in 0..6 {
        p.storage
            .insert_listing(listing("seller-1", &format!("heifer number {i}"), ""))
            .await
            .unwrap();
    }
    p.storage
        .insert_listing(listing("seller-2", "red dairy cow for sale", ""))
        .await
        .unwrap();
    p.storage
        .insert_listing(listing("seller-2", "red dairy cow sale", ""))
        .await
        .unwrap();

    let report = p.monitor.run_now().await.unwrap();
    assert_eq!(report.rules_failed, 0);

    let open = p.alerts.list(AlertStatus::Open, Page::default()).await.unwrap();
    assert!(open.iter().any(|a| a.alert_type == AlertType::SpamListing
        && a.metadata["userId"] == "seller-1"));
    assert!(open.iter().any(|a| a.alert_type == AlertType::DuplicateListing
        && a.metadata["userId"] == "seller-2"));
}

#[tokio::test]
async fn test_milk_anomaly_raise_and_resolve() {
    let mut p = pipeline();

    // No history yet
    let (_, anomaly) = p
        .milk
        .record_collection(reading(10.0, 1, TimeSlot::Morning))
        .await
        .unwrap();
    assert!(anomaly.is_none());

    p.milk
        .record_collection(reading(10.0, 2, TimeSlot::Morning))
        .await
        .unwrap();
    p.milk
        .record_collection(reading(10.0, 3, TimeSlot::Morning))
        .await
        .unwrap();

    let (_, anomaly) = p
        .milk
        .record_collection(reading(13.0, 4, TimeSlot::Evening))
        .await
        .unwrap();
    let anomaly = anomaly.expect("30% increase is flagged");
    assert_eq!(anomaly.anomaly_type, AnomalyType::Increase);
    assert_eq!(anomaly.anomaly_slots[&TimeSlot::Evening].len(), 1);

    assert_matches!(p.rx.recv().await.unwrap(), MonitorEvent::AlertNew(alert) => {
        assert_eq!(alert.alert_type, AlertType::MilkAnomaly);
        assert_eq!(alert.metadata["userId"], "farmer-7");
    });

    let resolved = p
        .milk
        .resolve_slot(&anomaly.id, TimeSlot::Evening)
        .await
        .unwrap();
    assert!(resolved.anomaly_slots[&TimeSlot::Evening].iter().all(|e| e.resolved));

    assert_matches!(p.rx.recv().await.unwrap(), MonitorEvent::AnomalyResolved(notice) => {
        assert_eq!(notice.anomaly_id, anomaly.id);
        assert_eq!(notice.producer_id, "farmer-7");
        assert_eq!(notice.entries_resolved, 1);
    });

    // Resolution keeps the record
    assert_eq!(p.milk.list(Some("farmer-7")).await.unwrap().len(), 1);
}
