use chrono::Utc;
use serde::Deserialize;

use super::{CapGate, GateDecision};
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct RoundtablePolicy {
    max_per_day: u64,
}

impl Default for RoundtablePolicy {
    fn default() -> Self {
        Self { max_per_day: 6 }
    }
}

/// Daily cap on scheduled conversations.
pub struct RoundtableCapGate;

impl CapGate for RoundtableCapGate {
    fn name(&self) -> &'static str {
        "roundtable_cap"
    }

    fn check(&self, store: &Store) -> Result<GateDecision> {
        let policy: RoundtablePolicy = store
            .policies()
            .get_or("roundtable_policy", RoundtablePolicy::default())?;
        let day_start = crate::store::utc_day_start(Utc::now());
        let scheduled = store.roundtable().count_created_since(day_start)?;
        if scheduled >= policy.max_per_day {
            return Ok(GateDecision::reject(format!(
                "Daily roundtable limit reached ({}/{})",
                scheduled, policy.max_per_day
            )));
        }
        Ok(GateDecision::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScheduleRequest;
    use serde_json::json;

    #[test]
    fn test_cap_counts_todays_conversations() {
        let store = Store::open_in_memory().unwrap();
        store
            .policies()
            .upsert("roundtable_policy", &json!({"max_per_day": 1}), None)
            .unwrap();
        assert!(RoundtableCapGate.check(&store).unwrap().is_pass());

        store
            .roundtable()
            .schedule(&ScheduleRequest {
                format: "standup".to_string(),
                topic: "t".to_string(),
                participants: vec!["ava".to_string(), "kai".to_string()],
            })
            .unwrap();
        assert!(!RoundtableCapGate.check(&store).unwrap().is_pass());
    }
}
