//! API shared state containing the pipeline components

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::info;

use crate::actors::MonitorHandle;
use crate::actors::messages::MonitorEvent;
use crate::alerts::AlertManager;
use crate::events::EventLog;
use crate::monitors::milk::MilkAnomalyDetector;
use crate::monitors::rules::default_rules;
use crate::notifier::{BroadcastNotifier, FanoutNotifier, Notifier};
use crate::sessions::SessionRegistry;
use crate::settings::Settings;
use crate::storage::{SharedStorage, StorageResult};

/// Capacity of the monitor push channel
const MONITOR_CHANNEL_CAPACITY: usize = 256;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub storage: SharedStorage,
    pub events: EventLog,
    pub settings: Settings,
    pub alerts: AlertManager,
    pub milk: MilkAnomalyDetector,
    pub sessions: SessionRegistry,

    /// Handle to the monitor worker
    pub monitor: MonitorHandle,

    /// Broadcast sender for monitor events (for WebSocket streaming)
    pub monitor_tx: broadcast::Sender<MonitorEvent>,
}

impl ApiState {
    /// Seed `settings` into storage, then wire the pipeline and spawn the
    /// monitor worker
    ///
    /// Seeding first means the worker's first interval already reflects
    /// seeded values. Keys that already have a stored value are left alone.
    pub async fn start(
        storage: SharedStorage,
        extra_notifiers: Vec<Arc<dyn Notifier>>,
        settings: &Map<String, Value>,
    ) -> StorageResult<Self> {
        let seeded = Settings::new(storage.clone()).seed(settings).await?;
        if seeded > 0 {
            info!("seeded {seeded} settings");
        }
        Ok(Self::spawn(storage, extra_notifiers))
    }

    /// Wire the pipeline over `storage` and spawn the monitor worker
    ///
    /// New alerts and resolved anomalies are always pushed to monitor
    /// sessions; `extra_notifiers` (e.g. a webhook) receive them as well.
    pub fn spawn(storage: SharedStorage, extra_notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        let broadcast = BroadcastNotifier::new(MONITOR_CHANNEL_CAPACITY);
        let monitor_tx = broadcast.sender();

        let notifier: Arc<dyn Notifier> = if extra_notifiers.is_empty() {
            Arc::new(broadcast)
        } else {
            let mut all: Vec<Arc<dyn Notifier>> = vec![Arc::new(broadcast)];
            all.extend(extra_notifiers);
            Arc::new(FanoutNotifier::new(all))
        };

        let settings = Settings::new(storage.clone());
        let alerts = AlertManager::new(storage.clone(), settings.clone(), notifier.clone());
        let milk = MilkAnomalyDetector::new(
            storage.clone(),
            settings.clone(),
            alerts.clone(),
            notifier,
        );
        let monitor = MonitorHandle::spawn(
            storage.clone(),
            settings.clone(),
            alerts.clone(),
            default_rules(),
        );

        Self {
            events: EventLog::new(storage.clone()),
            sessions: SessionRegistry::new(storage.clone()),
            storage,
            settings,
            alerts,
            milk,
            monitor,
            monitor_tx,
        }
    }
}
