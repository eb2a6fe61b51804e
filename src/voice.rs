//! Rule-derived personality modifiers.
//!
//! Voice evolution never calls the model: it folds an agent's memory
//! statistics into at most three short directives appended to the base
//! personality prompt. Results are cached per agent for a short TTL so a
//! single conversation stays internally consistent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::store::MemoryStats;

pub const MAX_MODIFIERS: usize = 3;

/// Derive voice modifiers from aggregate memory shape. Rules are ordered
/// by precedence; the first three that match win.
pub fn derive_modifiers(stats: &MemoryStats) -> Vec<String> {
    let mut modifiers = Vec::new();

    if stats.lessons >= 5 {
        modifiers.push(
            "You have learned several hard lessons; weigh risks out loud before committing."
                .to_string(),
        );
    }
    if stats.strategies >= 5 {
        modifiers.push(
            "You think in strategies; frame your points as concrete plans.".to_string(),
        );
    }
    if stats.insights >= 10 {
        modifiers.push(
            "You notice things others miss; ground your arguments in specific observations."
                .to_string(),
        );
    }
    if stats.patterns >= 5 {
        modifiers.push(
            "You spot recurring patterns; call them out when the discussion repeats itself."
                .to_string(),
        );
    }
    if stats.total_active > 0 && stats.avg_confidence >= 0.8 {
        modifiers.push("Speak with conviction; your track record backs you up.".to_string());
    } else if stats.total_active > 0 && stats.avg_confidence < 0.65 {
        modifiers.push("Hedge your claims; much of what you know is still tentative.".to_string());
    }
    if let Some(tag) = &stats.top_tag {
        modifiers.push(format!(
            "Lately your attention keeps returning to {}; let it color your examples.",
            tag
        ));
    }

    modifiers.truncate(MAX_MODIFIERS);
    modifiers
}

struct CacheSlot {
    modifiers: Vec<String>,
    computed_at: Instant,
}

/// Per-agent TTL cache over derived modifiers. Invalidated whenever the
/// agent's memory set changes.
pub struct VoiceCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl VoiceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<Vec<String>> {
        let slots = self.slots.lock();
        let slot = slots.get(agent_id)?;
        if slot.computed_at.elapsed() > self.ttl {
            return None;
        }
        Some(slot.modifiers.clone())
    }

    pub fn set(&self, agent_id: &str, modifiers: Vec<String>) {
        self.slots.lock().insert(
            agent_id.to_string(),
            CacheSlot {
                modifiers,
                computed_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, agent_id: &str) {
        self.slots.lock().remove(agent_id);
    }
}

impl Default for VoiceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
