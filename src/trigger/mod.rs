//! Time-budgeted evaluation of operator-authored trigger rules.
//!
//! Each enabled rule maps to a registered checker by its `trigger_event`
//! name. Cooldown is checked before the checker runs. A firing rule
//! produces exactly one proposal, submitted through the proposal service.

mod checkers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use checkers::{
    MissionFailedChecker, ProactiveChecker, ProposalDraft, TriggerChecker, TweetEngagementChecker,
};

use crate::error::Result;
use crate::proposal::{ProposalService, SubmitProposal};
use crate::store::{Store, TriggerRule};

#[derive(Debug, Clone)]
pub struct TriggerOptions {
    pub budget: Duration,
    pub default_agent: String,
    pub proactive_skip_probability: f64,
    pub lookback_minutes: i64,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(4),
            default_agent: "ava".to_string(),
            proactive_skip_probability: 0.15,
            lookback_minutes: 60,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct TriggerReport {
    pub evaluated: usize,
    pub fired: usize,
    pub on_cooldown: usize,
    pub skipped_budget: usize,
    pub errors: Vec<String>,
}

pub struct CheckContext<'a> {
    pub store: &'a Store,
    pub rule: &'a TriggerRule,
    pub options: &'a TriggerOptions,
}

pub struct TriggerEngine {
    store: Store,
    proposals: Arc<ProposalService>,
    options: TriggerOptions,
    checkers: HashMap<String, Box<dyn TriggerChecker>>,
    rng: StdRng,
}

impl TriggerEngine {
    pub fn new(
        store: Store,
        proposals: Arc<ProposalService>,
        options: TriggerOptions,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            proposals,
            options,
            checkers: HashMap::new(),
            rng,
        }
    }

    /// The standing checker set: failed-mission diagnostics, tweet
    /// engagement analysis, and the proactive topic rotators.
    pub fn with_standard_checkers(mut self) -> Self {
        self.register("mission_failed", Box::new(MissionFailedChecker));
        self.register("tweet_high_engagement", Box::new(TweetEngagementChecker));
        self.register("proactive_crawl", Box::new(ProactiveChecker::crawl()));
        self.register("proactive_research", Box::new(ProactiveChecker::research()));
        self
    }

    pub fn register(&mut self, event: &str, checker: Box<dyn TriggerChecker>) {
        self.checkers.insert(event.to_string(), checker);
    }

    /// One evaluation sweep across the enabled rules, bounded by the soft
    /// time budget.
    pub fn run_once(&mut self) -> Result<TriggerReport> {
        let started = Instant::now();
        let mut report = TriggerReport::default();
        let rules = self.store.triggers().list_enabled()?;
        let now = Utc::now();

        for rule in &rules {
            if started.elapsed() > self.options.budget {
                report.skipped_budget = rules.len() - report.evaluated;
                warn!(skipped = report.skipped_budget, "trigger budget exhausted");
                break;
            }
            report.evaluated += 1;

            // Cooldown is the cheapest check; do it before the checker.
            if let Some(last) = rule.last_fired_at {
                let cooldown = chrono::Duration::minutes(rule.cooldown_minutes as i64);
                if now - last < cooldown {
                    report.on_cooldown += 1;
                    continue;
                }
            }

            let Some(checker) = self.checkers.get(rule.trigger_event.as_str()) else {
                debug!(rule = %rule.name, event = %rule.trigger_event, "no checker registered");
                continue;
            };

            let ctx = CheckContext {
                store: &self.store,
                rule,
                options: &self.options,
            };
            match checker.check(&ctx, &mut self.rng) {
                Ok(Some(draft)) => match self.fire(rule, draft) {
                    Ok(fired) => {
                        if fired {
                            report.fired += 1;
                        }
                    }
                    Err(e) => report.errors.push(format!("{}: {}", rule.name, e)),
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "trigger checker failed");
                    report.errors.push(format!("{}: {}", rule.name, e));
                }
            }
        }
        Ok(report)
    }

    fn fire(&self, rule: &TriggerRule, draft: ProposalDraft) -> Result<bool> {
        let agent_id = draft
            .agent_id
            .or_else(|| {
                rule.action_config
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.options.default_agent.clone());

        let outcome = self.proposals.submit(SubmitProposal {
            agent_id,
            title: draft.title,
            description: draft.description,
            proposed_steps: draft.steps,
            source: crate::mission::ProposalSource::Trigger,
            source_trace_id: Some(draft.trace_id),
        })?;

        if outcome.deduplicated {
            return Ok(false);
        }
        self.store.triggers().mark_fired(&rule.id, Utc::now())?;
        info!(
            rule = %rule.name,
            proposal_id = outcome.proposal_id.as_deref().unwrap_or("-"),
            mission_id = outcome.mission_id.as_deref().unwrap_or("-"),
            success = outcome.success,
            "trigger fired"
        );
        Ok(true)
    }
}
