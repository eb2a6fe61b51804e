//! Post-conversation distillation.
//!
//! One completion call turns the transcript into typed artifacts; each
//! artifact class is then applied through its owning subsystem (memory
//! admission, bounded drift, proposal service).

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Format, RoundtableOptions};
use crate::error::{FleetError, Result};
use crate::llm::{CompletionRequest, TextCompletion};
use crate::mission::{ProposalSource, ProposedStep, StepKind};
use crate::proposal::{ProposalService, SubmitProposal};
use crate::store::{Conversation, ConversationTurn, MemoryInsert, MemoryType, MemoryWrite, Store};
use crate::voice::VoiceCache;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistilledMemory {
    pub agent_id: String,
    /// insight | pattern | strategy | preference | lesson
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistilledDrift {
    pub agent_a: String,
    pub agent_b: String,
    pub delta: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DistilledActionItem {
    pub title: String,
    /// Agent who should own the follow-up.
    pub agent_id: Option<String>,
    /// Step kind for the proposed mission; defaults to research.
    pub step_kind: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Distillation {
    #[serde(default)]
    pub memories: Vec<DistilledMemory>,
    #[serde(default)]
    pub drifts: Vec<DistilledDrift>,
    #[serde(default)]
    pub action_items: Vec<DistilledActionItem>,
}

/// What actually survived application.
pub struct Applied {
    pub memories_json: Value,
    pub action_items_json: Option<Value>,
    pub memories_kept: usize,
    pub action_items_submitted: usize,
}

/// Ask the model for structured artifacts over the transcript.
pub async fn extract(
    llm: &dyn TextCompletion,
    conversation: &Conversation,
    history: &[ConversationTurn],
) -> Result<Distillation> {
    let transcript = history
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.dialogue))
        .collect::<Vec<_>>()
        .join("\n");
    let schema = serde_json::to_string(&schema_for!(Distillation))?;
    let user = format!(
        "Distill this {} conversation about \"{}\" into JSON matching the schema.\n\nSchema:\n{}\n\nTranscript:\n{}\n\nReturn only JSON.",
        conversation.format, conversation.topic, schema, transcript
    );
    let raw = llm
        .complete(
            CompletionRequest::new(
                "You distill team conversations into memories, relationship adjustments, and action items.",
                user,
            )
            .with_temperature(0.2),
        )
        .await?;
    parse_distillation(&raw)
}

/// Tolerant parse: accepts bare JSON or a fenced code block.
pub fn parse_distillation(raw: &str) -> Result<Distillation> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body)
        .map_err(|e| FleetError::distillation(format!("unparseable distillation: {}", e)))
}

/// Apply artifacts through their owning subsystems. Per-artifact failures
/// are logged and skipped so one bad item does not sink the rest.
pub fn apply(
    store: &Store,
    proposals: &Arc<ProposalService>,
    voice_cache: &Arc<VoiceCache>,
    conversation: &Conversation,
    format: &Format,
    distillation: Distillation,
    options: &RoundtableOptions,
) -> Result<Applied> {
    let mut kept = Vec::new();
    for (i, mem) in distillation.memories.iter().enumerate() {
        let Ok(memory_type) = mem.memory_type.parse::<MemoryType>() else {
            warn!(kind = %mem.memory_type, "distilled memory has unknown type");
            continue;
        };
        let write = store.memories().insert(
            MemoryInsert {
                agent_id: mem.agent_id.clone(),
                memory_type,
                content: mem.content.clone(),
                confidence: mem.confidence,
                tags: mem.tags.clone(),
                source_trace_id: Some(format!("conv:{}:{}", conversation.id, i)),
            },
            options.memory_limits,
        )?;
        match write {
            MemoryWrite::Inserted { id, .. } => {
                voice_cache.invalidate(&mem.agent_id);
                kept.push(json!({
                    "id": id,
                    "agent_id": mem.agent_id,
                    "type": mem.memory_type,
                    "confidence": mem.confidence,
                }));
            }
            MemoryWrite::BelowConfidence => {
                debug!(agent = %mem.agent_id, confidence = mem.confidence, "memory below floor");
            }
            MemoryWrite::Duplicate { .. } => {}
        }
    }

    for drift in &distillation.drifts {
        if drift.agent_a == drift.agent_b {
            continue;
        }
        store.relationships().apply_drift(
            &drift.agent_a,
            &drift.agent_b,
            drift.delta,
            &drift.reason,
            options.drift_bounds,
        )?;
    }

    let mut submitted = Vec::new();
    if format.allows_action_items {
        for (i, item) in distillation
            .action_items
            .iter()
            .take(options.max_action_items)
            .enumerate()
        {
            let agent_id = item
                .agent_id
                .clone()
                .or_else(|| conversation.participants.first().cloned())
                .unwrap_or_else(|| "unassigned".to_string());
            let kind = StepKind::from(item.step_kind.as_deref().unwrap_or("research"));
            let topic = item.topic.clone().unwrap_or_else(|| item.title.clone());
            let outcome = proposals.submit(SubmitProposal {
                agent_id,
                title: item.title.clone(),
                description: Some(format!("Action item from {} conversation", format.name)),
                proposed_steps: vec![ProposedStep::new(kind, json!({"topic": topic}))],
                source: ProposalSource::Conversation,
                source_trace_id: Some(format!("conv:{}:action:{}", conversation.id, i)),
            });
            match outcome {
                Ok(out) if out.success => submitted.push(json!({
                    "title": item.title,
                    "proposal_id": out.proposal_id,
                })),
                Ok(out) => {
                    debug!(title = %item.title, reason = ?out.reason, "action item gated");
                }
                Err(e) => warn!(title = %item.title, error = %e, "action item failed"),
            }
        }
    }

    Ok(Applied {
        memories_kept: kept.len(),
        action_items_submitted: submitted.len(),
        memories_json: Value::Array(kept),
        action_items_json: if submitted.is_empty() {
            None
        } else {
            Some(Value::Array(submitted))
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateRegistry;
    use crate::store::ScheduleRequest;

    fn fixture(store: &Store) -> (Arc<ProposalService>, Arc<VoiceCache>, Conversation) {
        let proposals = Arc::new(ProposalService::new(
            store.clone(),
            Arc::new(GateRegistry::standard()),
        ));
        let conversation = store
            .roundtable()
            .schedule(&ScheduleRequest {
                format: "planning".to_string(),
                topic: "next sprint".to_string(),
                participants: vec!["ava".to_string(), "kai".to_string()],
            })
            .unwrap();
        (proposals, Arc::new(VoiceCache::default()), conversation)
    }

    fn distillation() -> Distillation {
        parse_distillation(
            r#"```json
            {
                "memories": [
                    {"agent_id": "ava", "type": "insight", "content": "standups drift long", "confidence": 0.8, "tags": ["process"]},
                    {"agent_id": "kai", "type": "lesson", "content": "hunch", "confidence": 0.3}
                ],
                "drifts": [
                    {"agent_a": "ava", "agent_b": "kai", "delta": 0.2, "reason": "agreed on plan"}
                ],
                "action_items": [
                    {"title": "write the sprint doc", "agent_id": "ava"},
                    {"title": "a"}, {"title": "b"}, {"title": "c"}
                ]
            }
            ```"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_tolerates_fences_and_rejects_garbage() {
        assert!(parse_distillation("{}").is_ok());
        assert!(parse_distillation("```json\n{}\n```").is_ok());
        assert!(parse_distillation("sure, here you go!").is_err());
    }

    #[test]
    fn test_apply_filters_caps_and_clamps() {
        let store = Store::open_in_memory().unwrap();
        let (proposals, cache, conversation) = fixture(&store);
        let format = super::super::lookup_format("planning").unwrap();

        let applied = apply(
            &store,
            &proposals,
            &cache,
            &conversation,
            format,
            distillation(),
            &RoundtableOptions::default(),
        )
        .unwrap();

        // Low-confidence memory dropped.
        assert_eq!(applied.memories_kept, 1);
        assert_eq!(store.memories().count_active("ava").unwrap(), 1);
        assert_eq!(store.memories().count_active("kai").unwrap(), 0);

        // Drift clamped to +-0.03.
        let rel = store.relationships().get("ava", "kai").unwrap();
        assert!((rel.affinity - 0.53).abs() < 1e-9);

        // Action items capped at three.
        assert_eq!(applied.action_items_submitted, 3);
        assert_eq!(
            store.proposals().list(Default::default()).unwrap().len(),
            3
        );
    }

    #[test]
    fn test_formats_without_action_items_submit_none() {
        let store = Store::open_in_memory().unwrap();
        let (proposals, cache, conversation) = fixture(&store);

        for name in ["debate", "retrospective", "watercooler"] {
            let format = super::super::lookup_format(name).unwrap();
            let applied = apply(
                &store,
                &proposals,
                &cache,
                &conversation,
                format,
                distillation(),
                &RoundtableOptions::default(),
            )
            .unwrap();
            assert_eq!(applied.action_items_submitted, 0, "{}", name);
            assert!(applied.action_items_json.is_none(), "{}", name);
        }
        assert!(store.proposals().list(Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_replayed_distillation_dedups_memories() {
        let store = Store::open_in_memory().unwrap();
        let (proposals, cache, conversation) = fixture(&store);
        let format = super::super::lookup_format("planning").unwrap();
        let options = RoundtableOptions::default();

        apply(&store, &proposals, &cache, &conversation, format, distillation(), &options)
            .unwrap();
        let second = apply(
            &store,
            &proposals,
            &cache,
            &conversation,
            format,
            distillation(),
            &options,
        )
        .unwrap();
        assert_eq!(second.memories_kept, 0);
        assert_eq!(store.memories().count_active("ava").unwrap(), 1);
    }
}
