use chrono::Utc;
use serde::Deserialize;

use super::{CapGate, GateDecision};
use crate::error::Result;
use crate::mission::StepKind;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct TweetQuotaPolicy {
    limit: u64,
}

impl Default for TweetQuotaPolicy {
    fn default() -> Self {
        Self { limit: 8 }
    }
}

/// Daily outbound tweet cap: `tweet_posted` events since UTC midnight
/// against `x_daily_quota.limit`.
pub struct TweetQuotaGate;

impl CapGate for TweetQuotaGate {
    fn name(&self) -> &'static str {
        "tweet_quota"
    }

    fn check(&self, store: &Store) -> Result<GateDecision> {
        let policy: TweetQuotaPolicy = store
            .policies()
            .get_or("x_daily_quota", TweetQuotaPolicy::default())?;
        let day_start = crate::store::utc_day_start(Utc::now());
        let posted = store.events().count_kind_since("tweet_posted", day_start)?;
        if posted >= policy.limit {
            return Ok(GateDecision::reject(format!(
                "Daily tweet quota reached ({}/{})",
                posted, policy.limit
            )));
        }
        Ok(GateDecision::Pass)
    }
}

#[derive(Debug, Deserialize)]
struct ContentPolicy {
    max_drafts_per_day: u64,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            max_drafts_per_day: 20,
        }
    }
}

/// Daily content-draft cap: `write_content` steps created since UTC
/// midnight against `content_policy.max_drafts_per_day`.
pub struct ContentQuotaGate;

impl CapGate for ContentQuotaGate {
    fn name(&self) -> &'static str {
        "content_quota"
    }

    fn check(&self, store: &Store) -> Result<GateDecision> {
        let policy: ContentPolicy = store
            .policies()
            .get_or("content_policy", ContentPolicy::default())?;
        let day_start = crate::store::utc_day_start(Utc::now());
        let drafted = store
            .steps()
            .count_kind_since(&StepKind::WriteContent, day_start)?;
        if drafted >= policy.max_drafts_per_day {
            return Ok(GateDecision::reject(format!(
                "Daily content draft limit reached ({}/{})",
                drafted, policy.max_drafts_per_day
            )));
        }
        Ok(GateDecision::Pass)
    }
}
