use async_trait::async_trait;
use tracing::trace;

use super::{DetectionRule, RuleContext};
use crate::alerts::AlertCandidate;
use crate::settings::{keys, window_start};
use crate::storage::schema::{AlertType, Severity, event_types};

/// Too many failed logins from one ip within the window
pub struct BruteForceRule;

#[async_trait]
impl DetectionRule for BruteForceRule {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    async fn evaluate(&self, ctx: &RuleContext) -> anyhow::Result<Vec<AlertCandidate>> {
        let window = ctx.settings.get_u64(keys::FAILED_LOGIN_WINDOW_MINUTES).await;
        let threshold = ctx.settings.get_u64(keys::FAILED_LOGIN_THRESHOLD).await;

        let counts = ctx
            .storage
            .count_events_by_ip(event_types::LOGIN_FAIL, window_start(ctx.now, window))
            .await?;
        trace!("{} ips with failed logins in the last {window} minutes", counts.len());

        Ok(counts
            .into_iter()
            .filter(|c| c.count as u64 > threshold)
            .map(|c| {
                AlertCandidate::new(
                    AlertType::BruteForce,
                    Severity::High,
                    format!(
                        "{} failed logins from {} in the last {} minutes",
                        c.count, c.ip, window
                    ),
                )
                .with("ip", c.ip)
                .with("attempts", c.count)
            })
            .collect())
    }
}
