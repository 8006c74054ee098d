use std::collections::HashMap;

use async_trait::async_trait;
use tracing::trace;

use super::{DetectionRule, RECENT_LISTINGS_LIMIT, RuleContext};
use crate::alerts::AlertCandidate;
use crate::settings::{keys, window_start};
use crate::storage::schema::{AlertType, Severity};

/// Median of `values`; `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Recent listings priced far from their category median
pub struct AbnormalPriceRule;

#[async_trait]
impl DetectionRule for AbnormalPriceRule {
    fn name(&self) -> &'static str {
        "abnormal_price"
    }

    async fn evaluate(&self, ctx: &RuleContext) -> anyhow::Result<Vec<AlertCandidate>> {
        let window = ctx.settings.get_u64(keys::ABNORMAL_PRICE_WINDOW_MINUTES).await;
        let ratio = ctx.settings.get_f64(keys::ABNORMAL_PRICE_RATIO).await;
        let min_samples = ctx.settings.get_u64(keys::ABNORMAL_PRICE_MIN_SAMPLES).await;

        if ratio <= 1.0 {
            anyhow::bail!("abnormal price ratio must be greater than 1, got {ratio}");
        }

        let mut prices: HashMap<String, Vec<f64>> = HashMap::new();
        for listing in ctx.storage.recent_listings(RECENT_LISTINGS_LIMIT).await? {
            if let Some(price) = listing.price.filter(|p| p.is_finite() && *p > 0.0) {
                prices.entry(listing.category).or_default().push(price);
            }
        }

        let medians: HashMap<String, f64> = prices
            .into_iter()
            .filter(|(_, samples)| samples.len() as u64 >= min_samples)
            .filter_map(|(category, samples)| median(&samples).map(|m| (category, m)))
            .collect();

        let recent = ctx
            .storage
            .listings_since(window_start(ctx.now, window))
            .await?;

        let mut candidates = Vec::new();
        for listing in recent {
            let (Some(price), Some(median)) = (listing.price, medians.get(&listing.category))
            else {
                continue;
            };

            if price < median * ratio && price > median / ratio {
                continue;
            }

            trace!(
                "listing {} priced {price} against median {median} in {}",
                listing.id, listing.category
            );
            let direction = if price >= median * ratio { "above" } else { "below" };
            candidates.push(
                AlertCandidate::new(
                    AlertType::AbnormalPrice,
                    Severity::Low,
                    format!(
                        "listing {} priced {} is far {} the {} median of {}",
                        listing.id, price, direction, listing.category, median
                    ),
                )
                .with("userId", listing.user_id)
                .with("listingId", listing.id)
                .with("price", price)
                .with("median", *median),
            );
        }

        Ok(candidates)
    }
}
