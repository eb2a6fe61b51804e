//! Multi-turn conversation driver.
//!
//! A pending conversation is driven turn by turn with affinity-weighted
//! speaker selection, then distilled in a single completion call into
//! memories, relationship drifts, and a capped set of action items.

mod distill;
mod formats;
mod scheduler;
mod speaker;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::info;

pub use distill::{Distillation, DistilledActionItem, DistilledDrift, DistilledMemory};
pub use formats::{lookup as lookup_format, validate_participants, Format, FORMATS};
pub use scheduler::{ConversationScheduler, ScheduleSlot};
pub use speaker::select_next_speaker;

use crate::error::{FleetError, Result};
use crate::llm::{CompletionRequest, TextCompletion};
use crate::proposal::ProposalService;
use crate::store::{
    Conversation, ConversationStatus, ConversationTurn, DriftBounds, MemoryLimits, NewEvent,
    ScheduleRequest, Store,
};
use crate::voice::{derive_modifiers, VoiceCache};

pub const MAX_TURN_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct RoundtableOptions {
    pub max_turn_chars: usize,
    pub max_action_items: usize,
    pub memory_limits: MemoryLimits,
    pub drift_bounds: DriftBounds,
}

impl Default for RoundtableOptions {
    fn default() -> Self {
        Self {
            max_turn_chars: MAX_TURN_CHARS,
            max_action_items: 3,
            memory_limits: MemoryLimits::default(),
            drift_bounds: DriftBounds::default(),
        }
    }
}

/// Validate and persist a conversation request.
pub fn schedule_conversation(store: &Store, req: &ScheduleRequest) -> Result<Conversation> {
    let format = formats::lookup(&req.format)?;
    formats::validate_participants(format, &req.participants)?;
    if req.topic.trim().is_empty() {
        return Err(FleetError::validation("topic must not be empty"));
    }
    store.roundtable().schedule(req)
}

pub struct RoundtableOrchestrator {
    store: Store,
    llm: Arc<dyn TextCompletion>,
    proposals: Arc<ProposalService>,
    voice_cache: Arc<VoiceCache>,
    options: RoundtableOptions,
    rng: StdRng,
}

impl RoundtableOrchestrator {
    pub fn new(
        store: Store,
        llm: Arc<dyn TextCompletion>,
        proposals: Arc<ProposalService>,
        voice_cache: Arc<VoiceCache>,
        options: RoundtableOptions,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            llm,
            proposals,
            voice_cache,
            options,
            rng,
        }
    }

    /// Drive a claimed (running) conversation to completion: turns, then
    /// distillation, then finalize.
    pub async fn run(&mut self, conversation: &Conversation) -> Result<()> {
        let format = formats::lookup(&conversation.format)?;
        let turns = self
            .rng
            .gen_range(format.min_turns..=format.max_turns);
        info!(
            conversation_id = %conversation.id,
            format = %format.name,
            turns,
            "conversation starting"
        );

        let mut times_spoken: HashMap<String, u32> = HashMap::new();
        let mut history: Vec<ConversationTurn> = conversation.history.clone();
        let mut last_speaker: Option<String> = history.last().map(|t| t.speaker.clone());

        for _ in 0..turns {
            let affinity = self.affinity_to(last_speaker.as_deref(), &conversation.participants)?;
            let Some(speaker) = speaker::select_next_speaker(
                &conversation.participants,
                last_speaker.as_deref(),
                &times_spoken,
                &affinity,
                &mut self.rng,
            ) else {
                break;
            };

            let dialogue = self
                .speak(&speaker, conversation, format, &history)
                .await?;
            let turn = ConversationTurn {
                speaker: speaker.clone(),
                dialogue,
                turn: history.len() as u32 + 1,
                timestamp: Utc::now(),
            };
            self.store.roundtable().append_turn(&conversation.id, &turn)?;
            self.store.events().emit(
                NewEvent::new(&speaker, "conversation_turn", &conversation.topic).with_metadata(
                    serde_json::json!({"conversation_id": conversation.id, "turn": turn.turn}),
                ),
            )?;
            history.push(turn);
            *times_spoken.entry(speaker.clone()).or_default() += 1;
            last_speaker = Some(speaker);
        }

        let artifacts = self.distill(conversation, format, &history).await?;
        self.store.roundtable().complete(
            &conversation.id,
            ConversationStatus::Completed,
            Some(&artifacts.memories_json),
            artifacts.action_items_json.as_ref(),
        )?;
        info!(
            conversation_id = %conversation.id,
            memories = artifacts.memories_kept,
            action_items = artifacts.action_items_submitted,
            "conversation completed"
        );
        Ok(())
    }

    fn affinity_to(
        &self,
        last_speaker: Option<&str>,
        participants: &[String],
    ) -> Result<HashMap<String, f64>> {
        let mut map = HashMap::new();
        let Some(last) = last_speaker else {
            return Ok(map);
        };
        for participant in participants {
            if participant == last {
                continue;
            }
            let rel = self.store.relationships().get(participant, last)?;
            map.insert(participant.clone(), rel.affinity);
        }
        Ok(map)
    }

    async fn speak(
        &self,
        speaker: &str,
        conversation: &Conversation,
        format: &Format,
        history: &[ConversationTurn],
    ) -> Result<String> {
        let modifiers = match self.voice_cache.get(speaker) {
            Some(cached) => cached,
            None => {
                let stats = self.store.memories().stats(speaker)?;
                let derived = derive_modifiers(&stats);
                self.voice_cache.set(speaker, derived.clone());
                derived
            }
        };

        let mut system = format!(
            "You are {}, one of several autonomous agents in a team {}.",
            speaker, format.name
        );
        for modifier in &modifiers {
            system.push(' ');
            system.push_str(modifier);
        }

        let transcript = history
            .iter()
            .map(|t| format!("{}: {}", t.speaker, t.dialogue))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Topic: {}\n\nConversation so far:\n{}\n\nReply with your next line only, in character, at most one sentence.",
            conversation.topic,
            if transcript.is_empty() { "(none yet)" } else { &transcript }
        );

        let raw = self
            .llm
            .complete(
                CompletionRequest::new(system, user).with_temperature(format.temperature),
            )
            .await?;
        Ok(truncate_chars(raw.trim(), self.options.max_turn_chars))
    }

    async fn distill(
        &mut self,
        conversation: &Conversation,
        format: &Format,
        history: &[ConversationTurn],
    ) -> Result<distill::Applied> {
        let distillation = distill::extract(
            self.llm.as_ref(),
            conversation,
            history,
        )
        .await?;
        distill::apply(
            &self.store,
            &self.proposals,
            &self.voice_cache,
            conversation,
            format,
            distillation,
            &self.options,
        )
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
