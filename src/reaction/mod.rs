//! Event-pattern reactions, split into two periodic phases.
//!
//! The scan phase matches recent events against a policy-configured
//! pattern list and queues `pending` reactions; the drain phase converts a
//! small budgeted batch of them into proposals. The split decouples
//! detection from proposal creation and bounds work per heartbeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::mission::{ProposalSource, ProposedStep, StepKind};
use crate::proposal::{ProposalService, SubmitProposal};
use crate::store::{AgentEvent, NewReaction, ReactionStatus, Store};

/// One entry of the `reaction_matrix` policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionPattern {
    /// Source agent to match, or `"*"` for any.
    pub source: String,
    /// Fires when the event's tags overlap these.
    pub tags: Vec<String>,
    pub reaction_type: String,
    pub target_agent: String,
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: i64,
    /// Step kind for the proposal the drain phase creates.
    #[serde(default = "default_step_kind")]
    pub step_kind: String,
}

fn default_probability() -> f64 {
    1.0
}

fn default_cooldown() -> i64 {
    120
}

fn default_step_kind() -> String {
    "research".to_string()
}

#[derive(Debug, Clone)]
pub struct ReactionOptions {
    pub lookback_minutes: i64,
    pub scan_limit: usize,
    pub drain_budget: Duration,
    pub drain_batch: usize,
}

impl Default for ReactionOptions {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
            scan_limit: 100,
            drain_budget: Duration::from_secs(3),
            drain_batch: 5,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub events_scanned: usize,
    pub queued: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct DrainReport {
    pub drained: usize,
    pub proposals_created: usize,
    pub discarded: usize,
    pub skipped_budget: usize,
    pub errors: Vec<String>,
}

pub struct ReactionEngine {
    store: Store,
    proposals: Arc<ProposalService>,
    options: ReactionOptions,
    rng: StdRng,
}

impl ReactionEngine {
    pub fn new(
        store: Store,
        proposals: Arc<ProposalService>,
        options: ReactionOptions,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            proposals,
            options,
            rng,
        }
    }

    /// Phase 1: match recent events against the pattern list and queue
    /// pending reactions.
    pub fn scan(&mut self) -> Result<ScanReport> {
        let patterns: Vec<ReactionPattern> =
            self.store.policies().get_or("reaction_matrix", Vec::new())?;
        if patterns.is_empty() {
            return Ok(ScanReport::default());
        }

        let since = Utc::now() - chrono::Duration::minutes(self.options.lookback_minutes);
        let events = self.store.events().recent(since, self.options.scan_limit)?;
        let mut report = ScanReport {
            events_scanned: events.len(),
            ..Default::default()
        };

        for event in &events {
            for pattern in &patterns {
                if !matches(pattern, event) {
                    continue;
                }
                // Agents do not react to their own events.
                if pattern.target_agent == event.agent_id {
                    continue;
                }
                let cooldown_start =
                    Utc::now() - chrono::Duration::minutes(pattern.cooldown_minutes);
                if self.store.reactions().exists_since(
                    &pattern.target_agent,
                    &pattern.reaction_type,
                    cooldown_start,
                )? {
                    continue;
                }
                if self.rng.gen::<f64>() >= pattern.probability {
                    continue;
                }

                self.store.reactions().insert(NewReaction {
                    source_event_id: event.id.clone(),
                    target_agent: pattern.target_agent.clone(),
                    reaction_type: pattern.reaction_type.clone(),
                    metadata: json!({
                        "event_kind": event.kind,
                        "event_title": event.title,
                        "step_kind": pattern.step_kind,
                    }),
                })?;
                report.queued += 1;
                info!(
                    target = %pattern.target_agent,
                    reaction = %pattern.reaction_type,
                    event_id = %event.id,
                    "reaction queued"
                );
            }
        }
        Ok(report)
    }

    /// Phase 2: convert a bounded batch of pending reactions into
    /// proposals.
    pub fn drain(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let batch = self.store.reactions().pending_batch(self.options.drain_batch)?;
        let mut report = DrainReport::default();

        for reaction in &batch {
            if started.elapsed() > self.options.drain_budget {
                report.skipped_budget = batch.len() - report.drained;
                warn!(skipped = report.skipped_budget, "reaction drain budget exhausted");
                break;
            }
            report.drained += 1;

            let step_kind = reaction
                .metadata
                .get("step_kind")
                .and_then(|v| v.as_str())
                .unwrap_or("research");
            let event_title = reaction
                .metadata
                .get("event_title")
                .and_then(|v| v.as_str())
                .unwrap_or("recent activity");

            let outcome = self.proposals.submit(SubmitProposal {
                agent_id: reaction.target_agent.clone(),
                title: format!("React to: {}", event_title),
                description: Some(format!(
                    "Reaction '{}' to event {}",
                    reaction.reaction_type, reaction.source_event_id
                )),
                proposed_steps: vec![ProposedStep::new(
                    StepKind::from(step_kind),
                    json!({"topic": event_title}),
                )],
                source: ProposalSource::Reaction,
                source_trace_id: Some(format!("reaction:{}", reaction.id)),
            });

            match outcome {
                Ok(out) if out.success => {
                    self.store
                        .reactions()
                        .mark(&reaction.id, ReactionStatus::Processed)?;
                    report.proposals_created += 1;
                }
                Ok(out) => {
                    // Gated or capped; the rejection is already audited on
                    // the proposal side, so the reaction is spent.
                    warn!(
                        reaction_id = %reaction.id,
                        reason = out.reason.as_deref().unwrap_or("-"),
                        "reaction discarded"
                    );
                    self.store
                        .reactions()
                        .mark(&reaction.id, ReactionStatus::Discarded)?;
                    report.discarded += 1;
                }
                Err(FleetError::Validation(reason)) => {
                    // A malformed pattern never converts; retrying cannot help.
                    warn!(reaction_id = %reaction.id, %reason, "reaction discarded");
                    self.store
                        .reactions()
                        .mark(&reaction.id, ReactionStatus::Discarded)?;
                    report.discarded += 1;
                }
                Err(e) => {
                    // Left pending; the next drain retries it.
                    report.errors.push(format!("{}: {}", reaction.id, e));
                }
            }
        }
        Ok(report)
    }
}

fn matches(pattern: &ReactionPattern, event: &AgentEvent) -> bool {
    if pattern.source != "*" && pattern.source != event.agent_id {
        return false;
    }
    pattern.tags.iter().any(|t| event.tags.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateRegistry;
    use crate::store::NewEvent;
    use rand::SeedableRng;

    fn engine(store: &Store) -> ReactionEngine {
        let proposals = Arc::new(ProposalService::new(
            store.clone(),
            Arc::new(GateRegistry::standard()),
        ));
        ReactionEngine::new(
            store.clone(),
            proposals,
            ReactionOptions::default(),
            StdRng::seed_from_u64(11),
        )
    }

    fn matrix(store: &Store, probability: f64) {
        store
            .policies()
            .upsert(
                "reaction_matrix",
                &json!([{
                    "source": "*",
                    "tags": ["launch"],
                    "reaction_type": "follow_up",
                    "target_agent": "kai",
                    "probability": probability,
                    "cooldown_minutes": 60,
                    "step_kind": "research",
                }]),
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_scan_queues_matching_events_once_per_cooldown() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        matrix(&store, 1.0);

        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "we launched").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "quiet day"))
            .unwrap();

        let report = engine.scan().unwrap();
        assert_eq!(report.events_scanned, 2);
        assert_eq!(report.queued, 1);

        // Cooldown: rescanning the window queues nothing new.
        let report = engine.scan().unwrap();
        assert_eq!(report.queued, 0);
    }

    #[test]
    fn test_target_does_not_react_to_itself() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        matrix(&store, 1.0);

        store
            .events()
            .emit(NewEvent::new("kai", "tweet_posted", "self post").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        let report = engine.scan().unwrap();
        assert_eq!(report.queued, 0);
    }

    #[test]
    fn test_zero_probability_never_queues() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        matrix(&store, 0.0);

        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "we launched").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        assert_eq!(engine.scan().unwrap().queued, 0);
    }

    #[test]
    fn test_drain_converts_to_proposal_and_marks_processed() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        matrix(&store, 1.0);

        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "we launched").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        engine.scan().unwrap();

        let report = engine.drain().unwrap();
        assert_eq!(report.drained, 1);
        assert_eq!(report.proposals_created, 1);

        let proposals = store.proposals().list(Default::default()).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].agent_id, "kai");
        assert_eq!(proposals[0].source, ProposalSource::Reaction);

        assert!(store.reactions().pending_batch(10).unwrap().is_empty());
        // Nothing left to drain.
        assert_eq!(engine.drain().unwrap().drained, 0);
    }

    #[test]
    fn test_drain_discards_capped_reactions() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        matrix(&store, 1.0);
        store
            .policies()
            .upsert("proposal_policy", &json!({"max_per_agent_per_day": 0}), None)
            .unwrap();

        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "we launched").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        engine.scan().unwrap();

        let report = engine.drain().unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(report.proposals_created, 0);
        assert!(report.errors.is_empty());

        // The reaction does not come back for another drain.
        assert!(store.reactions().pending_batch(10).unwrap().is_empty());
        assert_eq!(engine.drain().unwrap().drained, 0);
    }

    #[test]
    fn test_drain_discards_invalid_step_payloads() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = engine(&store);
        // post_tweet requires a 'content' payload the drain never builds.
        store
            .policies()
            .upsert(
                "reaction_matrix",
                &json!([{
                    "source": "*",
                    "tags": ["launch"],
                    "reaction_type": "amplify",
                    "target_agent": "kai",
                    "step_kind": "post_tweet",
                }]),
                None,
            )
            .unwrap();

        store
            .events()
            .emit(NewEvent::new("ava", "tweet_posted", "we launched").with_tags(vec![
                "launch".to_string(),
            ]))
            .unwrap();
        engine.scan().unwrap();

        let report = engine.drain().unwrap();
        assert_eq!(report.discarded, 1);
        assert!(report.errors.is_empty());
        assert!(store.proposals().list(Default::default()).unwrap().is_empty());
        assert!(store.reactions().pending_batch(10).unwrap().is_empty());
    }
}
