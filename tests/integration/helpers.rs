//! Test helpers shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use dairy_monitoring::events::{EventLog, NewEvent};
use dairy_monitoring::storage::schema::{Event, Listing, Metadata, event_types, new_id};
use dairy_monitoring::storage::{MemoryBackend, SharedStorage, StorageBackend};

pub const TEST_TOKEN: &str = "test-token";

pub fn memory_storage() -> SharedStorage {
    Arc::new(MemoryBackend::new())
}

/// Record `count` failed logins from `ip` through the event log
pub async fn record_failed_logins(events: &EventLog, ip: &str, count: usize) {
    for _ in 0..count {
        events
            .record(NewEvent::new(event_types::LOGIN_FAIL).ip(ip))
            .await
            .expect("event stored");
    }
}

/// A failed login written directly to storage, `minutes_ago` in the past
pub async fn backdated_failed_login(storage: &SharedStorage, ip: &str, minutes_ago: i64) {
    storage
        .insert_event(Event {
            id: new_id(),
            user_id: None,
            role: None,
            event_type: event_types::LOGIN_FAIL.to_string(),
            ip: Some(ip.to_string()),
            user_agent: None,
            metadata: Metadata::new(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        })
        .await
        .expect("event stored");
}

pub fn listing(user_id: &str, title: &str, description: &str) -> Listing {
    Listing {
        id: new_id(),
        user_id: user_id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        price: Some(100.0),
        category: "cattle".to_string(),
        created_at: Utc::now(),
    }
}

#[cfg(feature = "api")]
pub mod api {
    use dairy_monitoring::api::{ApiServer, ApiState, spawn_api_server};
    use dairy_monitoring::config::ApiConfig;
    use dairy_monitoring::storage::SharedStorage;

    use super::TEST_TOKEN;

    /// Spawn the API on a random port with the test token
    pub async fn spawn_test_api(storage: SharedStorage) -> (ApiServer, ApiState) {
        let state = ApiState::spawn(storage, vec![]);
        let config = ApiConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            auth_token: Some(TEST_TOKEN.to_string()),
            enable_cors: true,
        };
        let server = spawn_api_server(&config, state.clone()).await.unwrap();
        (server, state)
    }

    pub fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    pub fn url(server: &ApiServer, path: &str) -> String {
        format!("http://{}{}", server.addr, path)
    }
}
