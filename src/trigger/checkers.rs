use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;

use super::CheckContext;
use crate::error::Result;
use crate::mission::{ProposedStep, StepKind};

/// A proposal skeleton returned by a firing checker. The engine fills in
/// the source and submits it.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub title: String,
    pub description: Option<String>,
    pub steps: Vec<ProposedStep>,
    /// Idempotency key; refires for the same cause deduplicate here.
    pub trace_id: String,
    pub agent_id: Option<String>,
}

pub trait TriggerChecker: Send + Sync {
    fn check(&self, ctx: &CheckContext<'_>, rng: &mut StdRng) -> Result<Option<ProposalDraft>>;
}

/// Proposes a diagnostic mission when recent missions have failed.
pub struct MissionFailedChecker;

impl TriggerChecker for MissionFailedChecker {
    fn check(&self, ctx: &CheckContext<'_>, _rng: &mut StdRng) -> Result<Option<ProposalDraft>> {
        let threshold = ctx
            .rule
            .conditions
            .get("threshold")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as usize;
        let lookback = ctx
            .rule
            .conditions
            .get("lookback_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(ctx.options.lookback_minutes);

        let since = Utc::now() - Duration::minutes(lookback);
        let failed = ctx.store.missions().recent_failed(since, 5)?;
        if failed.len() < threshold {
            return Ok(None);
        }

        let ids: Vec<&str> = failed.iter().map(|m| m.id.as_str()).collect();
        Ok(Some(ProposalDraft {
            title: format!("Diagnose {} recent mission failure(s)", failed.len()),
            description: Some(format!(
                "Failed in the last {} minutes: {}",
                lookback,
                failed
                    .iter()
                    .map(|m| m.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            steps: vec![ProposedStep::new(
                StepKind::Diagnose,
                json!({"failed_missions": ids}),
            )],
            // Keyed to the newest failure so a fresh failure refires.
            trace_id: format!("trigger:{}:{}", ctx.rule.id, failed[0].id),
            agent_id: None,
        }))
    }
}

/// Proposes an analysis mission for the best unreviewed high-engagement
/// tweet, marking it reviewed so it is only analyzed once.
pub struct TweetEngagementChecker;

impl TriggerChecker for TweetEngagementChecker {
    fn check(&self, ctx: &CheckContext<'_>, _rng: &mut StdRng) -> Result<Option<ProposalDraft>> {
        let threshold = ctx
            .rule
            .conditions
            .get("min_engagement_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.1);

        let Some(tweet) = ctx.store.tweets().unreviewed_above(threshold, 1)?.pop() else {
            return Ok(None);
        };
        ctx.store.tweets().mark_reviewed(&tweet.tweet_id)?;

        Ok(Some(ProposalDraft {
            title: format!("Analyze high-engagement tweet {}", tweet.tweet_id),
            description: None,
            steps: vec![ProposedStep::new(
                StepKind::Analyze,
                json!({
                    "topic": "tweet engagement",
                    "tweet_id": tweet.tweet_id,
                    "engagement_rate": tweet.engagement_rate,
                }),
            )],
            trace_id: format!("trigger:{}:tweet:{}", ctx.rule.id, tweet.tweet_id),
            agent_id: None,
        }))
    }
}

/// Topic-rotation checker with an intentional skip roll, so proactive work
/// does not fire with mechanical regularity.
pub struct ProactiveChecker {
    kind: StepKind,
    default_topics: &'static [&'static str],
}

impl ProactiveChecker {
    pub fn crawl() -> Self {
        Self {
            kind: StepKind::Crawl,
            default_topics: &["ai news", "model releases", "agent frameworks"],
        }
    }

    pub fn research() -> Self {
        Self {
            kind: StepKind::Research,
            default_topics: &["prompting techniques", "eval methods", "tool use"],
        }
    }
}

impl TriggerChecker for ProactiveChecker {
    fn check(&self, ctx: &CheckContext<'_>, rng: &mut StdRng) -> Result<Option<ProposalDraft>> {
        if rng.gen::<f64>() < ctx.options.proactive_skip_probability {
            return Ok(None);
        }

        let configured: Vec<String> = ctx
            .rule
            .conditions
            .get("topics")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let topics: Vec<&str> = if configured.is_empty() {
            self.default_topics.to_vec()
        } else {
            configured.iter().map(String::as_str).collect()
        };
        let topic = topics[(ctx.rule.fire_count as usize) % topics.len()];

        Ok(Some(ProposalDraft {
            title: format!("Proactive {}: {}", self.kind, topic),
            description: None,
            steps: vec![ProposedStep::new(self.kind.clone(), json!({"topic": topic}))],
            // One firing per rule per UTC day.
            trace_id: format!(
                "trigger:{}:{}",
                ctx.rule.id,
                Utc::now().format("%Y-%m-%d")
            ),
            agent_id: None,
        }))
    }
}
