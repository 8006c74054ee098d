//! Alert deduplication and lifecycle
//!
//! Every alert candidate produced by a rule or the milk detector goes
//! through [`AlertManager::raise`]. A candidate whose fingerprint matches a
//! non-closed alert of the same type created within the dedupe window is
//! suppressed; otherwise it is persisted and pushed to the notifier.
//!
//! The check and the insert are separate store operations. Two concurrent
//! raises of the same fingerprint may both persist; dedupe is best effort.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──reviewing──► reviewing ──close──► closed
//!   └──────────────close──────────────────▲
//! escalate: severity → high, status unchanged
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::notifier::Notifier;
use crate::settings::{Settings, keys, window_start};
use crate::storage::schema::{
    Alert, AlertFilter, AlertStatus, AlertType, Metadata, Page, Severity, new_id,
};
use crate::storage::{SharedStorage, StorageError, StorageResult};

/// Metadata keys contributing to the fingerprint, in order, with their prefix
const FINGERPRINT_PARTS: [(&str, &str); 3] = [("ip", "ip"), ("userId", "user"), ("listingId", "listing")];

/// Stable identity of an alert subject
///
/// The alert type, then `ip:<ip>`, `user:<userId>` and `listing:<listingId>`
/// for those metadata keys that are present, joined by `|`.
pub fn fingerprint(alert_type: AlertType, metadata: &Metadata) -> String {
    let mut parts = vec![alert_type.as_str().to_string()];

    for (key, prefix) in FINGERPRINT_PARTS {
        match metadata.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => parts.push(format!("{prefix}:{s}")),
            Some(other) => parts.push(format!("{prefix}:{other}")),
        }
    }

    parts.join("|")
}

/// A detection result waiting for the deduplicator
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metadata: Metadata,
}

impl AlertCandidate {
    pub fn new(alert_type: AlertType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.alert_type, &self.metadata)
    }
}

/// Admin action on an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    Reviewing,
    Close,
    Escalate,
}

#[derive(Debug)]
pub enum AlertError {
    NotFound(String),

    /// Closed alerts accept no further action
    AlreadyClosed(String),

    Storage(StorageError),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::NotFound(id) => write!(f, "alert {} not found", id),
            AlertError::AlreadyClosed(id) => write!(f, "alert {} is already closed", id),
            AlertError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AlertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AlertError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for AlertError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => AlertError::NotFound(what),
            other => AlertError::Storage(other),
        }
    }
}

#[derive(Clone)]
pub struct AlertManager {
    storage: SharedStorage,
    settings: Settings,
    notifier: Arc<dyn Notifier>,
}

impl AlertManager {
    pub fn new(storage: SharedStorage, settings: Settings, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            storage,
            settings,
            notifier,
        }
    }

    /// Persist a candidate unless an equivalent alert is still open
    ///
    /// Returns `Ok(None)` when the candidate was suppressed.
    #[instrument(skip(self, candidate), fields(alert_type = %candidate.alert_type))]
    pub async fn raise(&self, candidate: AlertCandidate) -> StorageResult<Option<Alert>> {
        let window = self.settings.get_u64(keys::ALERT_DEDUPE_MINUTES).await;
        let fingerprint = candidate.fingerprint();
        let now = Utc::now();
        let since = window_start(now, window);

        if let Some(existing) = self
            .storage
            .find_open_alert(&fingerprint, candidate.alert_type, since)
            .await?
        {
            debug!(
                "suppressed {} (open alert {} within {} minutes)",
                fingerprint, existing.id, window
            );
            return Ok(None);
        }

        let AlertCandidate {
            alert_type,
            severity,
            message,
            mut metadata,
        } = candidate;
        metadata.insert("fingerprint".to_string(), Value::String(fingerprint));

        let alert = Alert {
            id: new_id(),
            alert_type,
            severity,
            message,
            metadata,
            status: AlertStatus::Open,
            created_at: now,
            resolved_at: None,
        };

        self.storage.insert_alert(alert.clone()).await?;
        info!("raised {} alert {}: {}", alert.alert_type, alert.id, alert.message);

        if let Err(e) = self.notifier.alert_created(&alert).await {
            warn!("failed to push alert {}: {:#}", alert.id, e);
        }

        Ok(Some(alert))
    }

    pub async fn get(&self, id: &str) -> Result<Alert, AlertError> {
        self.storage
            .get_alert(id)
            .await?
            .ok_or_else(|| AlertError::NotFound(id.to_string()))
    }

    pub async fn list(&self, status: AlertStatus, page: Page) -> StorageResult<Vec<Alert>> {
        self.storage.list_alerts(status, page).await
    }

    pub async fn count(&self, filter: &AlertFilter) -> StorageResult<usize> {
        self.storage.count_alerts(filter).await
    }

    /// Apply an admin action
    #[instrument(skip(self))]
    pub async fn apply(&self, id: &str, action: AlertAction) -> Result<Alert, AlertError> {
        let mut alert = self.get(id).await?;

        if alert.status == AlertStatus::Closed {
            return Err(AlertError::AlreadyClosed(id.to_string()));
        }

        match action {
            AlertAction::Reviewing => alert.status = AlertStatus::Reviewing,
            AlertAction::Close => {
                alert.status = AlertStatus::Closed;
                alert.resolved_at = Some(Utc::now());
            }
            AlertAction::Escalate => alert.severity = Severity::High,
        }

        self.storage.update_alert(&alert).await?;
        debug!("alert {} is now {} ({:?})", alert.id, alert.status, alert.severity);
        Ok(alert)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AlertError> {
        if self.storage.delete_alert(id).await? {
            info!("deleted alert {}", id);
            Ok(())
        } else {
            Err(AlertError::NotFound(id.to_string()))
        }
    }
}
