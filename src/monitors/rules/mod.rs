//! Detection rules evaluated by the monitor worker
//!
//! Each rule reads the stores through a [`RuleContext`] and returns zero or
//! more [`AlertCandidate`]s. Rules never persist alerts themselves; the
//! worker passes every candidate through the deduplicator.
//!
//! Rules run in the fixed order of [`default_rules`].

mod abnormal_price;
mod brute_force;
mod duplicate_listing;
mod spam_listing;

pub use abnormal_price::{AbnormalPriceRule, median};
pub use brute_force::BruteForceRule;
pub use duplicate_listing::{DuplicateListingRule, jaccard, normalize};
pub use spam_listing::SpamListingRule;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alerts::AlertCandidate;
use crate::settings::Settings;
use crate::storage::SharedStorage;

/// Latest listings considered by the listing-content rules
pub const RECENT_LISTINGS_LIMIT: usize = 200;

/// Everything a rule may read during one tick
#[derive(Clone)]
pub struct RuleContext {
    pub storage: SharedStorage,
    pub settings: Settings,
    /// Tick start; all windows end here
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait DetectionRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, ctx: &RuleContext) -> anyhow::Result<Vec<AlertCandidate>>;
}

pub fn default_rules() -> Vec<Box<dyn DetectionRule>> {
    vec![
        Box::new(BruteForceRule),
        Box::new(SpamListingRule),
        Box::new(DuplicateListingRule),
        Box::new(AbnormalPriceRule),
    ]
}
