//! MonitorActor - Periodic rule evaluation
//!
//! A single task evaluates the ordered rule list on a fixed interval. Ticks
//! never overlap: the next sleep starts only after a tick completes, and the
//! interval (`worker.loop.ms`) is re-read after every tick so admins can
//! retune it at runtime.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → rule 1 … rule N → AlertManager::raise → Alert store → Notifier
//!     ↑
//!     └─── Commands (RunNow, GetStatus, Shutdown)
//! ```
//!
//! Each rule runs under a timeout equal to the current interval. A rule that
//! fails or times out is logged and counted; the remaining rules still run.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{MonitorCommand, MonitorStatus, RuleOutcome, TickReport};
use crate::alerts::AlertManager;
use crate::monitors::rules::{DetectionRule, RuleContext};
use crate::settings::{Settings, keys};
use crate::storage::SharedStorage;

/// Lower bound for the tick interval
const MIN_INTERVAL_MS: u64 = 10;

/// Actor that runs the detection rules
pub struct MonitorActor {
    storage: SharedStorage,
    settings: Settings,
    alerts: AlertManager,

    /// Evaluated in order on every tick
    rules: Vec<Box<dyn DetectionRule>>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<MonitorCommand>,

    status: MonitorStatus,
}

impl MonitorActor {
    pub fn new(
        storage: SharedStorage,
        settings: Settings,
        alerts: AlertManager,
        rules: Vec<Box<dyn DetectionRule>>,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        Self {
            storage,
            settings,
            alerts,
            rules,
            command_rx,
            status: MonitorStatus::default(),
        }
    }

    async fn read_interval(&self) -> Duration {
        let ms = self
            .settings
            .get_u64(keys::WORKER_LOOP_MS)
            .await
            .max(MIN_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    /// Run the actor's main loop
    ///
    /// This is the entry point for the actor. It runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self), fields(rules = self.rules.len()))]
    pub async fn run(mut self) {
        let mut interval = self.read_interval().await;
        self.status.interval_ms = interval.as_millis() as u64;
        info!("starting monitor worker with a {}ms interval", self.status.interval_ms);

        let timer = sleep(interval);
        tokio::pin!(timer);

        let mut shutdown_ack = None;

        loop {
            tokio::select! {
                () = &mut timer => {
                    self.tick(interval).await;
                    interval = self.read_interval().await;
                    self.status.interval_ms = interval.as_millis() as u64;
                    timer.as_mut().reset(Instant::now() + interval);
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(MonitorCommand::RunNow { respond_to }) => {
                        debug!("received RunNow command");
                        let report = self.tick(interval).await;
                        let _ = respond_to.send(report);
                    }

                    Some(MonitorCommand::GetStatus { respond_to }) => {
                        let _ = respond_to.send(self.status.clone());
                    }

                    Some(MonitorCommand::Shutdown { respond_to }) => {
                        debug!("received shutdown command");
                        shutdown_ack = Some(respond_to);
                        break;
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        info!("monitor worker stopped after {} ticks", self.status.ticks);
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Evaluate every rule once
    #[instrument(skip(self))]
    async fn tick(&mut self, budget: Duration) -> TickReport {
        let started_at = Utc::now();
        let ctx = RuleContext {
            storage: self.storage.clone(),
            settings: self.settings.clone(),
            now: started_at,
        };

        let mut outcomes = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let outcome = match timeout(budget, run_rule(&self.alerts, rule.as_ref(), &ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("rule {} timed out after {:?}", rule.name(), budget);
                    RuleOutcome {
                        rule: rule.name().to_string(),
                        candidates: 0,
                        raised: 0,
                        suppressed: 0,
                        error: Some(format!("timed out after {}ms", budget.as_millis())),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = TickReport {
            started_at,
            finished_at: Utc::now(),
            rules_run: outcomes.len(),
            rules_failed: outcomes.iter().filter(|o| o.error.is_some()).count(),
            alerts_raised: outcomes.iter().map(|o| o.raised).sum(),
            alerts_suppressed: outcomes.iter().map(|o| o.suppressed).sum(),
            rules: outcomes,
        };

        if report.alerts_raised > 0 || report.rules_failed > 0 {
            info!(
                "tick finished: {} alerts raised, {} suppressed, {} rules failed",
                report.alerts_raised, report.alerts_suppressed, report.rules_failed
            );
        } else {
            trace!("tick finished without alerts");
        }

        self.status.ticks += 1;
        self.status.last_tick_at = Some(report.finished_at);
        self.status.last_report = Some(report.clone());
        report
    }
}

/// Evaluate one rule and pass its candidates through the deduplicator
async fn run_rule(alerts: &AlertManager, rule: &dyn DetectionRule, ctx: &RuleContext) -> RuleOutcome {
    let mut outcome = RuleOutcome {
        rule: rule.name().to_string(),
        candidates: 0,
        raised: 0,
        suppressed: 0,
        error: None,
    };

    let candidates = match rule.evaluate(ctx).await {
        Ok(candidates) => candidates,
        Err(e) => {
            error!("rule {} failed: {:#}", rule.name(), e);
            outcome.error = Some(format!("{e:#}"));
            return outcome;
        }
    };
    outcome.candidates = candidates.len();

    for candidate in candidates {
        match alerts.raise(candidate).await {
            Ok(Some(_)) => outcome.raised += 1,
            Ok(None) => outcome.suppressed += 1,
            Err(e) => {
                error!("rule {} could not persist an alert: {}", rule.name(), e);
                outcome.error = Some(format!("failed to persist alert: {e}"));
            }
        }
    }

    outcome
}

/// Handle for controlling the MonitorActor
///
/// This handle provides a typed API for sending commands to the actor.
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the monitor worker
    pub fn spawn(
        storage: SharedStorage,
        settings: Settings,
        alerts: AlertManager,
        rules: Vec<Box<dyn DetectionRule>>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MonitorActor::new(storage, settings, alerts, rules, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a tick immediately and wait for its report
    pub async fn run_now(&self) -> Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive tick report")
    }

    pub async fn status(&self) -> Result<MonitorStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive status")
    }

    /// Stop the worker and wait until its loop has exited
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("worker exited without acknowledging shutdown")
    }
}
