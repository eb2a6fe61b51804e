//! Clock-driven conversation scheduling.
//!
//! Operators describe the day as slots under the `conversation_schedule`
//! policy; each heartbeat-hour match rolls a probability die and schedules
//! at most one conversation per slot per UTC day.

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use super::schedule_conversation;
use crate::error::Result;
use crate::store::{Conversation, ScheduleRequest, Store};

fn default_probability() -> f64 {
    1.0
}

/// One entry in the `conversation_schedule` policy.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ScheduleSlot {
    /// UTC hour (0..=23) this slot fires in.
    pub hour: u32,
    pub format: String,
    pub topic: String,
    pub participants: Vec<String>,
    /// Chance the slot fires when its hour comes up.
    #[serde(default = "default_probability")]
    pub probability: f64,
}

#[derive(Debug, Deserialize)]
struct RoundtablePolicy {
    max_per_day: u64,
}

impl Default for RoundtablePolicy {
    fn default() -> Self {
        Self { max_per_day: 6 }
    }
}

pub struct ConversationScheduler {
    store: Store,
    rng: StdRng,
}

impl ConversationScheduler {
    pub fn new(store: Store, rng: StdRng) -> Self {
        Self { store, rng }
    }

    /// Evaluate every slot matching the current hour. Returns conversations
    /// scheduled this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<Conversation>> {
        let slots: Vec<ScheduleSlot> = self
            .store
            .policies()
            .get_or("conversation_schedule", Vec::new())?;
        if slots.is_empty() {
            return Ok(Vec::new());
        }

        let policy: RoundtablePolicy = self
            .store
            .policies()
            .get_or("roundtable_policy", RoundtablePolicy::default())?;
        let day_start = crate::store::utc_day_start(now);
        let mut scheduled = Vec::new();

        for slot in slots.iter().filter(|s| s.hour == now.hour()) {
            let today = self.store.roundtable().count_created_since(day_start)?;
            if today >= policy.max_per_day {
                debug!(max = policy.max_per_day, "daily conversation cap reached");
                break;
            }
            if self
                .store
                .roundtable()
                .exists_for_slot(&slot.format, day_start)?
            {
                continue;
            }
            if self.rng.gen::<f64>() >= slot.probability {
                debug!(format = %slot.format, hour = slot.hour, "slot skipped by roll");
                continue;
            }
            let conversation = schedule_conversation(
                &self.store,
                &ScheduleRequest {
                    format: slot.format.clone(),
                    topic: slot.topic.clone(),
                    participants: slot.participants.clone(),
                },
            )?;
            info!(
                id = %conversation.id,
                format = %slot.format,
                topic = %slot.topic,
                "conversation scheduled"
            );
            scheduled.push(conversation);
        }
        Ok(scheduled)
    }
}
