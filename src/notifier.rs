//! Alert and anomaly notification sinks
//!
//! The pipeline pushes through a [`Notifier`] injected at construction:
//!
//! - [`BroadcastNotifier`] feeds the websocket stream of monitor sessions
//! - [`WebhookNotifier`] POSTs the same payload to an external URL
//! - [`FanoutNotifier`] delivers to several sinks
//! - [`NoopNotifier`] for contexts without a channel
//!
//! Delivery is best effort. Callers log a returned error and carry on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};

use crate::actors::messages::{AnomalyResolved, MonitorEvent};
use crate::storage::schema::Alert;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A new alert passed the deduplicator
    async fn alert_created(&self, alert: &Alert) -> anyhow::Result<()>;

    /// A milk anomaly slot was resolved
    async fn anomaly_resolved(&self, notice: &AnomalyResolved) -> anyhow::Result<()>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn alert_created(&self, _alert: &Alert) -> anyhow::Result<()> {
        Ok(())
    }

    async fn anomaly_resolved(&self, _notice: &AnomalyResolved) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Publishes [`MonitorEvent`]s to every subscribed monitor session
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<MonitorEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<MonitorEvent> {
        self.tx.clone()
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine: nobody is watching the monitor right now.
        match self.tx.send(event) {
            Ok(receivers) => trace!("published monitor event to {receivers} receivers"),
            Err(_) => trace!("no receivers for monitor event"),
        }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn alert_created(&self, alert: &Alert) -> anyhow::Result<()> {
        self.publish(MonitorEvent::AlertNew(alert.clone()));
        Ok(())
    }

    async fn anomaly_resolved(&self, notice: &AnomalyResolved) -> anyhow::Result<()> {
        self.publish(MonitorEvent::AnomalyResolved(notice.clone()));
        Ok(())
    }
}

/// POSTs `{"event", "data", "timestamp"}` to a configured URL
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    #[instrument(skip(self, event), fields(url = %self.url))]
    async fn post(&self, event: MonitorEvent) -> anyhow::Result<()> {
        let mut payload = serde_json::to_value(&event)?;
        payload["timestamp"] = json!(Utc::now().to_rfc3339());

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("failed to send webhook request")?;

        if !response.status().is_success() {
            anyhow::bail!("webhook responded with status {}", response.status());
        }

        debug!("webhook notification delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn alert_created(&self, alert: &Alert) -> anyhow::Result<()> {
        self.post(MonitorEvent::AlertNew(alert.clone())).await
    }

    async fn anomaly_resolved(&self, notice: &AnomalyResolved) -> anyhow::Result<()> {
        self.post(MonitorEvent::AnomalyResolved(notice.clone())).await
    }
}

/// Delivers to every inner notifier; reports the first failure after trying all
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

fn first_error(results: Vec<anyhow::Result<()>>) -> anyhow::Result<()> {
    results.into_iter().collect::<anyhow::Result<Vec<()>>>()?;
    Ok(())
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn alert_created(&self, alert: &Alert) -> anyhow::Result<()> {
        let deliveries = self.notifiers.iter().map(|n| n.alert_created(alert));
        first_error(futures::future::join_all(deliveries).await)
    }

    async fn anomaly_resolved(&self, notice: &AnomalyResolved) -> anyhow::Result<()> {
        let deliveries = self.notifiers.iter().map(|n| n.anomaly_resolved(notice));
        first_error(futures::future::join_all(deliveries).await)
    }
}
