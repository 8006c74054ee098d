//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Authentication middleware guards every route
//! - Responses use the `{success, data}` / `{success, error}` envelope
//! - Alert, config, stats, listing and milk routes drive the pipeline
//! - The monitor stream pushes new alerts and honours force-termination

use std::time::Duration;

use axum::http::StatusCode;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};

use crate::helpers::api::{client, spawn_test_api, url};
use crate::helpers::{TEST_TOKEN, memory_storage};

const AUTH: &str = "Bearer test-token";

async fn get(addr: &str) -> (StatusCode, Value) {
    let response = client()
        .get(addr)
        .header("Authorization", AUTH)
        .send()
        .await
        .unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

async fn send(request: reqwest::RequestBuilder, body: Option<Value>) -> (StatusCode, Value) {
    let request = request.header("Authorization", AUTH);
    let request = match body {
        Some(body) => request.json(&body),
        None => request,
    };
    let response = request.send().await.unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

async fn post_failed_logins(base: &str, ip: &str, count: usize) {
    for _ in 0..count {
        let (status, _) = send(
            client().post(format!("{base}/api/v1/events")),
            Some(json!({ "type": "auth.login.fail", "ip": ip, "userId": "u-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}

#[tokio::test]
async fn test_auth_is_required() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let health = url(&server, "/api/v1/health");

    let response = client().get(&health).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client()
        .get(&health)
        .header("Authorization", "Token test-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client()
        .get(&health)
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let (status, body) = get(&health).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["storage"], true);
}

#[tokio::test]
async fn test_events_intake_and_query() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");

    post_failed_logins(&base, "10.0.0.1", 2).await;
    let (status, body) = send(
        client().post(format!("{base}/api/v1/events")),
        Some(json!({ "type": "auth.login.success", "ip": "10.0.0.2" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["type"], "auth.login.success");

    let (status, body) = get(&format!("{base}/api/v1/events?type=auth.login.fail")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = get(&format!("{base}/api/v1/events?ip=10.0.0.2&limit=10")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = get(&format!("{base}/api/v1/events?from=2999-01-01T00:00:00Z")).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_lifecycle() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");

    post_failed_logins(&base, "10.6.6.6", 21).await;

    let (status, body) = send(client().post(format!("{base}/api/v1/monitor/run")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alertsRaised"], 1);
    assert_eq!(body["data"]["rulesFailed"], 0);

    let (_, body) = get(&format!("{base}/api/v1/alerts")).await;
    let alerts = body["data"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["type"], "brute_force");
    let id = alerts[0]["id"].as_str().unwrap().to_string();
    let alert_url = format!("{base}/api/v1/alerts/{id}");

    let (status, body) = send(
        client().patch(&alert_url),
        Some(json!({ "action": "reviewing" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "reviewing");

    let (status, _) = send(client().patch(&alert_url), Some(json!({ "action": "snooze" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(client().patch(&alert_url), Some(json!({ "action": "close" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "closed");

    let (status, body) = send(client().patch(&alert_url), Some(json!({ "action": "escalate" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (_, body) = get(&format!("{base}/api/v1/alerts?status=closed")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = get(&format!("{base}/api/v1/alerts?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(client().delete(&alert_url), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&alert_url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_config_defaults_and_override() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let config_url = url(&server, "/api/v1/config");

    let (_, body) = get(&config_url).await;
    let entry = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["key"] == "failedLogin.threshold")
        .cloned()
        .unwrap();
    assert_eq!(entry["value"], 20);
    assert_eq!(entry["isDefault"], true);

    let (status, _) = send(
        client().put(&config_url),
        Some(json!({ "failedLogin.threshold": 3, "alert.dedupe.minutes": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&config_url).await;
    let entry = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["key"] == "failedLogin.threshold")
        .cloned()
        .unwrap();
    assert_eq!(entry["value"], 3);
    assert_eq!(entry["isDefault"], false);

    // The override reaches the next tick
    post_failed_logins(&url(&server, ""), "10.7.7.7", 4).await;
    let (_, body) = send(client().post(url(&server, "/api/v1/monitor/run")), None).await;
    assert_eq!(body["data"]["alertsRaised"], 1);
}

#[tokio::test]
async fn test_stats_and_listing_intake() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");

    post_failed_logins(&base, "10.8.8.8", 2).await;

    for i in 0..6 {
        let (status, body) = send(
            client().post(format!("{base}/api/v1/listings")),
            Some(json!({
                "userId": "seller-9",
                "title": format!("jersey heifer {i}"),
                "price": 900.0,
                "category": "cattle",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["userId"], "seller-9");
    }

    let (status, _) = send(
        client().post(format!("{base}/api/v1/listings")),
        Some(json!({ "userId": "seller-9", "title": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = get(&format!("{base}/api/v1/events?type=listing.create")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 6);

    send(client().post(format!("{base}/api/v1/monitor/run")), None).await;

    let (status, body) = get(&format!("{base}/api/v1/monitor/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["eventsToday"], 8);
    assert_eq!(body["data"]["failedLoginsPastHour"], 2);
    assert_eq!(body["data"]["openAlertsToday"], 1);
    assert_eq!(body["data"]["flaggedListings"], 1);

    let (_, body) = get(&format!("{base}/api/v1/monitor/status")).await;
    assert_eq!(body["data"]["ticks"], 1);
}

#[tokio::test]
async fn test_milk_routes() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");
    let milk = format!("{base}/api/v1/milk");

    let (status, _) = send(
        client().post(&milk),
        Some(json!({
            "producerId": "farmer-2",
            "litres": -1.0,
            "collectionDate": "2026-06-01",
            "timeSlot": "morning",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        client().post(&milk),
        Some(json!({
            "producerId": "farmer-2",
            "litres": 10.0,
            "collectionDate": "2026-06-01",
            "timeSlot": "morning",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["anomaly"].is_null());

    let (_, body) = send(
        client().post(&milk),
        Some(json!({
            "producerId": "farmer-2",
            "litres": 6.0,
            "collectionDate": "2026-06-02",
            "timeSlot": "afternoon",
        })),
    )
    .await;
    assert_eq!(body["data"]["anomaly"]["anomalyType"], "Decrease");
    let id = body["data"]["anomaly"]["id"].as_str().unwrap().to_string();

    let (_, body) = get(&format!("{base}/api/v1/milk/anomalies?producer=farmer-2")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        client().post(format!("{base}/api/v1/milk/anomalies/{id}/slots/night/resolve")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        client().post(format!("{base}/api/v1/milk/anomalies/{id}/slots/morning/resolve")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        client().post(format!("{base}/api/v1/milk/anomalies/{id}/slots/afternoon/resolve")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["anomalySlots"]["afternoon"][0]["resolved"], true);

    let anomaly_url = format!("{base}/api/v1/milk/anomalies/{id}");
    let (status, _) = send(client().delete(&anomaly_url), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(client().delete(&anomaly_url), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitor_stream_and_session_termination() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");

    let mut request = format!("ws://{}/api/v1/monitor/stream?user_id=admin-1", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {TEST_TOKEN}").parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let greeting = timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let greeting: Value = serde_json::from_str(greeting.to_text().unwrap()).unwrap();
    assert_eq!(greeting["event"], "session:connected");
    assert_eq!(greeting["data"]["userId"], "admin-1");
    let connection_id = greeting["data"]["connectionId"].as_str().unwrap().to_string();

    let (_, body) = get(&format!("{base}/api/v1/sessions")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    post_failed_logins(&base, "10.4.4.4", 21).await;
    send(client().post(format!("{base}/api/v1/monitor/run")), None).await;

    let pushed = timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let pushed: Value = serde_json::from_str(pushed.to_text().unwrap()).unwrap();
    assert_eq!(pushed["event"], "alert:new");
    assert_eq!(pushed["data"]["type"], "brute_force");

    let (status, _) = send(
        client().delete(format!("{base}/api/v1/sessions/{connection_id}")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The server closes the socket
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let (_, body) = get(&format!("{base}/api/v1/sessions")).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = send(
        client().delete(format!("{base}/api/v1/sessions/{connection_id}")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

type Stream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Open the monitor stream with `query` and consume the greeting
async fn open_stream(addr: std::net::SocketAddr, query: &str) -> Stream {
    let mut request = format!("ws://{addr}/api/v1/monitor/stream?{query}")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {TEST_TOKEN}").parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let greeting = timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let greeting: Value = serde_json::from_str(greeting.to_text().unwrap()).unwrap();
    assert_eq!(greeting["event"], "session:connected");
    ws
}

#[tokio::test]
async fn test_resolution_notice_goes_to_its_producer() {
    let (server, _state) = spawn_test_api(memory_storage()).await;
    let base = url(&server, "");

    let mut producer = open_stream(server.addr, "user_id=farmer-5&role=farmer").await;
    let mut neighbour = open_stream(server.addr, "user_id=farmer-6&role=farmer").await;

    for (litres, date) in [(10.0, "2026-06-01"), (20.0, "2026-06-02")] {
        send(
            client().post(format!("{base}/api/v1/milk")),
            Some(json!({
                "producerId": "farmer-5",
                "litres": litres,
                "collectionDate": date,
                "timeSlot": "evening",
            })),
        )
        .await;
    }
    let (_, body) = get(&format!("{base}/api/v1/milk/anomalies?producer=farmer-5")).await;
    let id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        client().post(format!("{base}/api/v1/milk/anomalies/{id}/slots/evening/resolve")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The milk_anomaly alert is admin-only, so the first push is the notice
    let pushed = timeout(Duration::from_secs(5), producer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let pushed: Value = serde_json::from_str(pushed.to_text().unwrap()).unwrap();
    assert_eq!(pushed["event"], "anomaly:resolved");
    assert_eq!(pushed["data"]["producerId"], "farmer-5");

    assert!(
        timeout(Duration::from_millis(300), neighbour.next())
            .await
            .is_err()
    );
}
