use async_trait::async_trait;

use super::{DetectionRule, RuleContext};
use crate::alerts::AlertCandidate;
use crate::settings::{keys, window_start};
use crate::storage::schema::{AlertType, Severity};

/// One creator posting too many listings within the window
pub struct SpamListingRule;

#[async_trait]
impl DetectionRule for SpamListingRule {
    fn name(&self) -> &'static str {
        "spam_listing"
    }

    async fn evaluate(&self, ctx: &RuleContext) -> anyhow::Result<Vec<AlertCandidate>> {
        let window = ctx.settings.get_u64(keys::SPAM_LISTING_WINDOW_MINUTES).await;
        let threshold = ctx.settings.get_u64(keys::SPAM_LISTING_THRESHOLD).await;

        let counts = ctx
            .storage
            .count_listings_by_creator(window_start(ctx.now, window))
            .await?;

        Ok(counts
            .into_iter()
            .filter(|c| c.count as u64 > threshold)
            .map(|c| {
                AlertCandidate::new(
                    AlertType::SpamListing,
                    Severity::Medium,
                    format!(
                        "user {} created {} listings in the last {} minutes",
                        c.user_id, c.count, window
                    ),
                )
                .with("userId", c.user_id)
                .with("count", c.count)
            })
            .collect())
    }
}
