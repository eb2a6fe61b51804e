//! Periodic maintenance passes.
//!
//! Each pass is isolated: a failing pass lands in the report as an error
//! and the remaining passes still run.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::queue::StepQueue;
use crate::reaction::ReactionEngine;
use crate::roundtable::ConversationScheduler;
use crate::store::{MemoryInsert, MemoryLimits, MemoryType, MemoryWrite, Store};
use crate::trigger::TriggerEngine;

pub const STALE_STEP_MINUTES: i64 = 30;
pub const STALE_STEP_REASON: &str = "Stale - exceeded 30 min timeout";
pub const STALE_CONVERSATION_MINUTES: i64 = 60;

const PROMOTION_CONFIDENCE: f64 = 0.8;
const PROMOTION_BOOST: f64 = 0.05;
const PROMOTION_BATCH: usize = 20;

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassResult {
    Ok { detail: Value },
    Failed { error: String },
}

#[derive(Debug, Serialize)]
pub struct PassReport {
    pub pass: &'static str,
    #[serde(flatten)]
    pub result: PassResult,
}

#[derive(Debug, Default, Serialize)]
pub struct HeartbeatReport {
    pub passes: Vec<PassReport>,
}

impl HeartbeatReport {
    pub fn failed_passes(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| matches!(p.result, PassResult::Failed { .. }))
            .count()
    }

    fn record(&mut self, pass: &'static str, outcome: Result<Value>) {
        let result = match outcome {
            Ok(detail) => PassResult::Ok { detail },
            Err(e) => {
                warn!(pass, error = %e, "heartbeat pass failed");
                PassResult::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.passes.push(PassReport { pass, result });
    }
}

pub struct Heartbeat {
    store: Store,
    queue: StepQueue,
    triggers: TriggerEngine,
    reactions: ReactionEngine,
    scheduler: ConversationScheduler,
    memory_limits: MemoryLimits,
}

impl Heartbeat {
    pub fn new(
        store: Store,
        triggers: TriggerEngine,
        reactions: ReactionEngine,
        scheduler: ConversationScheduler,
        memory_limits: MemoryLimits,
    ) -> Self {
        Self {
            queue: StepQueue::new(store.clone()),
            store,
            triggers,
            reactions,
            scheduler,
            memory_limits,
        }
    }

    pub fn run(&mut self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        let triggers = self.triggers.run_once().and_then(|r| Ok(serde_json::to_value(r)?));
        report.record("trigger_eval", triggers);

        let scan = self.reactions.scan().and_then(|r| Ok(serde_json::to_value(r)?));
        report.record("reaction_scan", scan);

        let drain = self.reactions.drain().and_then(|r| Ok(serde_json::to_value(r)?));
        report.record("reaction_drain", drain);

        report.record("insight_promotion", self.promote_insights());
        report.record("stale_steps", self.recover_stale_steps());
        report.record("stale_conversations", self.recover_stale_conversations());

        let scheduled = self
            .scheduler
            .tick(Utc::now())
            .map(|convs| json!({"scheduled": convs.len()}));
        report.record("conversation_schedule", scheduled);

        info!(
            passes = report.passes.len(),
            failed = report.failed_passes(),
            "heartbeat complete"
        );
        report
    }

    /// High-confidence insights are re-filed as the durable type they have
    /// earned: prescriptive content becomes a strategy, the rest a lesson.
    /// The original insight is superseded by its promotion.
    fn promote_insights(&self) -> Result<Value> {
        let candidates = self
            .store
            .memories()
            .promotable_insights(PROMOTION_CONFIDENCE, PROMOTION_BATCH)?;
        let mut promoted = 0usize;
        for insight in &candidates {
            let lowered = insight.content.to_lowercase();
            let target = if lowered.contains("should") || lowered.contains("better") {
                MemoryType::Strategy
            } else {
                MemoryType::Lesson
            };
            let write = self.store.memories().insert(
                MemoryInsert {
                    agent_id: insight.agent_id.clone(),
                    memory_type: target,
                    content: insight.content.clone(),
                    confidence: (insight.confidence + PROMOTION_BOOST).min(0.95),
                    tags: insight.tags.clone(),
                    source_trace_id: Some(format!("promoted:{}", insight.id)),
                },
                self.memory_limits,
            )?;
            let new_id = match write {
                MemoryWrite::Inserted { id, .. } => id,
                MemoryWrite::Duplicate { existing_id } => existing_id,
                MemoryWrite::BelowConfidence => continue,
            };
            if self.store.memories().supersede(&insight.id, &new_id)? {
                promoted += 1;
            }
        }
        Ok(json!({"candidates": candidates.len(), "promoted": promoted}))
    }

    fn recover_stale_steps(&self) -> Result<Value> {
        let cutoff = Utc::now() - ChronoDuration::minutes(STALE_STEP_MINUTES);
        let recovered = self.queue.recover_stale(cutoff, STALE_STEP_REASON)?;
        Ok(json!({"recovered": recovered}))
    }

    fn recover_stale_conversations(&self) -> Result<Value> {
        let cutoff = Utc::now() - ChronoDuration::minutes(STALE_CONVERSATION_MINUTES);
        let failed = self.store.roundtable().fail_stale(cutoff)?;
        Ok(json!({"failed": failed}))
    }
}
