//! Integration tests for the webhook notifier
//!
//! These tests verify that:
//! - New alerts are POSTed as `alert:new` events
//! - Resolved milk anomalies are POSTed as `anomaly:resolved`
//! - A failing webhook never blocks alert creation

use std::sync::Arc;

use chrono::NaiveDate;
use dairy_monitoring::alerts::{AlertCandidate, AlertManager};
use dairy_monitoring::monitors::milk::{MilkAnomalyDetector, MilkReading};
use dairy_monitoring::notifier::{Notifier, WebhookNotifier};
use dairy_monitoring::settings::Settings;
use dairy_monitoring::storage::schema::{AlertType, Severity, TimeSlot};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::memory_storage;

fn webhook(server: &MockServer) -> Arc<dyn Notifier> {
    Arc::new(WebhookNotifier::new(format!("{}/hooks/monitor", server.uri())).unwrap())
}

#[tokio::test]
async fn test_new_alert_is_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/monitor"))
        .and(body_partial_json(json!({
            "event": "alert:new",
            "data": { "type": "brute_force", "metadata": { "ip": "10.0.0.5" } },
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let storage = memory_storage();
    let alerts = AlertManager::new(storage.clone(), Settings::new(storage), webhook(&server));

    let alert = alerts
        .raise(
            AlertCandidate::new(AlertType::BruteForce, Severity::High, "too many failures")
                .with("ip", "10.0.0.5"),
        )
        .await
        .unwrap();
    assert!(alert.is_some());

    server.verify().await;
}

#[tokio::test]
async fn test_failing_webhook_does_not_block_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let storage = memory_storage();
    let alerts = AlertManager::new(storage.clone(), Settings::new(storage), webhook(&server));

    let alert = alerts
        .raise(AlertCandidate::new(AlertType::SuspiciousActivity, Severity::Low, "odd").with("userId", "u-1"))
        .await
        .unwrap()
        .expect("alert stored despite webhook failure");

    assert_eq!(alerts.get(&alert.id).await.unwrap().id, alert.id);
}

#[tokio::test]
async fn test_anomaly_resolution_is_posted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "event": "alert:new" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "event": "anomaly:resolved",
            "data": { "producerId": "farmer-3", "slot": "morning" },
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let storage = memory_storage();
    let settings = Settings::new(storage.clone());
    let notifier = webhook(&server);
    let alerts = AlertManager::new(storage.clone(), settings.clone(), notifier.clone());
    let milk = MilkAnomalyDetector::new(storage, settings, alerts, notifier);

    let reading = |litres: f64, day: u32| MilkReading {
        producer_id: "farmer-3".to_string(),
        litres,
        collection_date: NaiveDate::from_ymd_opt(2026, 5, day).unwrap(),
        time_slot: TimeSlot::Morning,
    };
    milk.record_collection(reading(20.0, 1)).await.unwrap();
    let (_, anomaly) = milk.record_collection(reading(30.0, 2)).await.unwrap();
    let anomaly = anomaly.expect("50% increase is flagged");

    milk.resolve_slot(&anomaly.id, TimeSlot::Morning).await.unwrap();

    server.verify().await;
}
