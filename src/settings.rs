//! Runtime-tunable settings with compiled defaults
//!
//! Thresholds and windows used by the rules and the milk detector live in
//! the store so admins can tune them without a restart. Reads never fail:
//! a missing key, a store error or a value of the wrong shape all resolve
//! to the compiled default in [`DEFAULTS`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::storage::schema::ConfigEntry;
use crate::storage::{SharedStorage, StorageResult};

pub mod keys {
    pub const ALERT_DEDUPE_MINUTES: &str = "alert.dedupe.minutes";
    pub const WORKER_LOOP_MS: &str = "worker.loop.ms";
    pub const FAILED_LOGIN_WINDOW_MINUTES: &str = "failedLogin.window.minutes";
    pub const FAILED_LOGIN_THRESHOLD: &str = "failedLogin.threshold";
    pub const SPAM_LISTING_WINDOW_MINUTES: &str = "spamListing.window.minutes";
    pub const SPAM_LISTING_THRESHOLD: &str = "spamListing.threshold";
    pub const SPAM_LISTING_SIMILARITY_THRESHOLD: &str = "spamListing.similarity.threshold";
    pub const ABNORMAL_PRICE_WINDOW_MINUTES: &str = "abnormalPrice.window.minutes";
    pub const ABNORMAL_PRICE_RATIO: &str = "abnormalPrice.ratio";
    pub const ABNORMAL_PRICE_MIN_SAMPLES: &str = "abnormalPrice.minSamples";
    pub const MILK_ANOMALY_THRESHOLD_PERCENT: &str = "milkAnomaly.threshold.percent";
    pub const MILK_ANOMALY_WINDOW_SIZE: &str = "milkAnomaly.window.size";
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Integer(u64),
    Number(f64),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::Integer(v) => Value::from(v),
            DefaultValue::Number(v) => Value::from(v),
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            DefaultValue::Integer(v) => v,
            DefaultValue::Number(v) => v.max(0.0) as u64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            DefaultValue::Integer(v) => v as f64,
            DefaultValue::Number(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SettingDefault {
    pub key: &'static str,
    pub value: DefaultValue,
    pub description: &'static str,
}

pub const DEFAULTS: &[SettingDefault] = &[
    SettingDefault {
        key: keys::ALERT_DEDUPE_MINUTES,
        value: DefaultValue::Integer(10),
        description: "Minutes during which an open alert suppresses new alerts with the same fingerprint",
    },
    SettingDefault {
        key: keys::WORKER_LOOP_MS,
        value: DefaultValue::Integer(60_000),
        description: "Interval between monitor worker ticks in milliseconds",
    },
    SettingDefault {
        key: keys::FAILED_LOGIN_WINDOW_MINUTES,
        value: DefaultValue::Integer(15),
        description: "Look-back window for failed logins per ip",
    },
    SettingDefault {
        key: keys::FAILED_LOGIN_THRESHOLD,
        value: DefaultValue::Integer(20),
        description: "Failed logins per ip above which a brute_force alert is raised",
    },
    SettingDefault {
        key: keys::SPAM_LISTING_WINDOW_MINUTES,
        value: DefaultValue::Integer(10),
        description: "Look-back window for listings per creator",
    },
    SettingDefault {
        key: keys::SPAM_LISTING_THRESHOLD,
        value: DefaultValue::Integer(5),
        description: "Listings per creator above which a spam_listing alert is raised",
    },
    SettingDefault {
        key: keys::SPAM_LISTING_SIMILARITY_THRESHOLD,
        value: DefaultValue::Number(0.8),
        description: "Jaccard similarity at or above which two listings are duplicates",
    },
    SettingDefault {
        key: keys::ABNORMAL_PRICE_WINDOW_MINUTES,
        value: DefaultValue::Integer(60),
        description: "Look-back window for listings checked against their category median",
    },
    SettingDefault {
        key: keys::ABNORMAL_PRICE_RATIO,
        value: DefaultValue::Number(5.0),
        description: "Factor away from the category median that flags a price",
    },
    SettingDefault {
        key: keys::ABNORMAL_PRICE_MIN_SAMPLES,
        value: DefaultValue::Integer(5),
        description: "Priced listings a category needs before its median is trusted",
    },
    SettingDefault {
        key: keys::MILK_ANOMALY_THRESHOLD_PERCENT,
        value: DefaultValue::Integer(30),
        description: "Deviation from the recent average, in percent, that flags a milk reading",
    },
    SettingDefault {
        key: keys::MILK_ANOMALY_WINDOW_SIZE,
        value: DefaultValue::Integer(3),
        description: "Number of prior readings averaged by the milk detector",
    },
];

/// Start of a look-back window of `minutes` ending at `now`
///
/// Windows too large to represent start at the earliest representable time.
pub fn window_start(now: DateTime<Utc>, minutes: u64) -> DateTime<Utc> {
    chrono::Duration::try_minutes(minutes.min(i64::MAX as u64) as i64)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn lookup_default(key: &str) -> Option<&'static SettingDefault> {
    DEFAULTS.iter().find(|d| d.key == key)
}

/// A setting as shown to admins: the stored entry or its compiled default
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingView {
    pub key: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub is_default: bool,
}

#[derive(Clone)]
pub struct Settings {
    storage: SharedStorage,
}

impl Settings {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Stored value for `key`, else its compiled default, else `Value::Null`
    pub async fn get(&self, key: &str) -> Value {
        match self.storage.get_setting(key).await {
            Ok(Some(entry)) => return entry.value,
            Ok(None) => {}
            Err(e) => warn!("failed to read setting {key}, using default: {e}"),
        }

        lookup_default(key)
            .map(|d| d.value.to_value())
            .unwrap_or(Value::Null)
    }

    pub async fn get_u64(&self, key: &str) -> u64 {
        let value = self.get(key).await;
        match as_u64(&value) {
            Some(v) => v,
            None => {
                let fallback = lookup_default(key).map(|d| d.value.as_u64()).unwrap_or(0);
                if !value.is_null() {
                    warn!("setting {key} has non-integer value {value}, using {fallback}");
                }
                fallback
            }
        }
    }

    pub async fn get_f64(&self, key: &str) -> f64 {
        let value = self.get(key).await;
        match as_f64(&value) {
            Some(v) => v,
            None => {
                let fallback = lookup_default(key).map(|d| d.value.as_f64()).unwrap_or(0.0);
                if !value.is_null() {
                    warn!("setting {key} has non-numeric value {value}, using {fallback}");
                }
                fallback
            }
        }
    }

    /// Insert or replace a setting
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: Value) -> StorageResult<ConfigEntry> {
        let entry = ConfigEntry {
            key: key.to_string(),
            value,
            description: lookup_default(key).map(|d| d.description.to_string()),
            updated_at: Utc::now(),
        };
        self.storage.put_setting(entry.clone()).await?;
        debug!("setting {key} updated to {}", entry.value);
        Ok(entry)
    }

    pub async fn set_many(&self, values: Map<String, Value>) -> StorageResult<Vec<ConfigEntry>> {
        let mut entries = Vec::with_capacity(values.len());
        for (key, value) in values {
            entries.push(self.set(&key, value).await?);
        }
        Ok(entries)
    }

    /// Store each value whose key has no stored entry yet; returns how many were written
    pub async fn seed(&self, values: &Map<String, Value>) -> StorageResult<usize> {
        let mut written = 0;
        for (key, value) in values {
            if self.storage.get_setting(key).await?.is_none() {
                self.set(key, value.clone()).await?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Stored entries plus every compiled default not overridden, ordered by key
    pub async fn list(&self) -> StorageResult<Vec<SettingView>> {
        let stored = self.storage.list_settings().await?;

        let mut views: Vec<SettingView> = stored
            .into_iter()
            .map(|entry| SettingView {
                key: entry.key,
                value: entry.value,
                description: entry.description,
                updated_at: Some(entry.updated_at),
                is_default: false,
            })
            .collect();

        for default in DEFAULTS {
            if !views.iter().any(|v| v.key == default.key) {
                views.push(SettingView {
                    key: default.key.to_string(),
                    value: default.value.to_value(),
                    description: Some(default.description.to_string()),
                    updated_at: None,
                    is_default: true,
                });
            }
        }

        views.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(views)
    }
}

/// Accepts JSON numbers and numeric strings
fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v: &f64| v.is_finite())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0 && v.fract() == 0.0).map(|v| v as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
