use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::trace;

use super::{DetectionRule, RECENT_LISTINGS_LIMIT, RuleContext};
use crate::alerts::AlertCandidate;
use crate::settings::keys;
use crate::storage::schema::{AlertType, Listing, Severity};

/// Most recent listings per creator compared pairwise
const PER_CREATOR_LIMIT: usize = 20;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static pattern is valid"));

/// Lowercased alphanumeric tokens of `text`
pub fn normalize(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`, or `None` when either set is empty
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    Some(intersection as f64 / union as f64)
}

fn listing_tokens(listing: &Listing) -> BTreeSet<String> {
    normalize(&format!("{} {}", listing.title, listing.description))
}

/// Near-identical listings posted by the same creator
pub struct DuplicateListingRule;

#[async_trait]
impl DetectionRule for DuplicateListingRule {
    fn name(&self) -> &'static str {
        "duplicate_listing"
    }

    async fn evaluate(&self, ctx: &RuleContext) -> anyhow::Result<Vec<AlertCandidate>> {
        let threshold = ctx
            .settings
            .get_f64(keys::SPAM_LISTING_SIMILARITY_THRESHOLD)
            .await;

        let listings = ctx.storage.recent_listings(RECENT_LISTINGS_LIMIT).await?;

        // newest first, so each group keeps its most recent listings
        let mut by_creator: BTreeMap<&str, Vec<(&Listing, BTreeSet<String>)>> = BTreeMap::new();
        for listing in &listings {
            let group = by_creator.entry(listing.user_id.as_str()).or_default();
            if group.len() < PER_CREATOR_LIMIT {
                group.push((listing, listing_tokens(listing)));
            }
        }

        let mut candidates = Vec::new();
        for (user_id, group) in by_creator {
            for (i, (a, tokens_a)) in group.iter().enumerate() {
                for (b, tokens_b) in &group[i + 1..] {
                    let Some(score) = jaccard(tokens_a, tokens_b) else {
                        continue;
                    };
                    if score < threshold {
                        continue;
                    }

                    trace!("listings {} and {} are {score:.2} similar", a.id, b.id);
                    candidates.push(
                        AlertCandidate::new(
                            AlertType::DuplicateListing,
                            Severity::Medium,
                            format!(
                                "user {} posted near-duplicate listings ({:.0}% similar)",
                                user_id,
                                score * 100.0
                            ),
                        )
                        .with("userId", user_id)
                        .with("listingA", a.id.clone())
                        .with("listingB", b.id.clone())
                        .with("score", (score * 100.0).round() / 100.0),
                    );
                }
            }
        }

        Ok(candidates)
    }
}
