use chrono::{Duration, Utc};
use serde::Deserialize;

use super::{CapGate, GateDecision};
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct DeployPolicy {
    #[serde(default)]
    kill_switch: bool,
    cooldown_minutes: i64,
}

impl Default for DeployPolicy {
    fn default() -> Self {
        Self {
            kill_switch: false,
            cooldown_minutes: 60,
        }
    }
}

/// Deploy admission: a hard kill switch plus a cooldown measured from the
/// last `deploy_completed` event.
pub struct DeployGate;

impl CapGate for DeployGate {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn check(&self, store: &Store) -> Result<GateDecision> {
        let policy: DeployPolicy = store
            .policies()
            .get_or("deploy_policy", DeployPolicy::default())?;
        if policy.kill_switch {
            return Ok(GateDecision::reject("Deploys are disabled by kill switch"));
        }
        if let Some(last) = store.events().last_of_kind("deploy_completed")? {
            let cooldown_end = last.created_at + Duration::minutes(policy.cooldown_minutes);
            if Utc::now() < cooldown_end {
                return Ok(GateDecision::reject(format!(
                    "Deploy cooldown active until {}",
                    cooldown_end.to_rfc3339()
                )));
            }
        }
        Ok(GateDecision::Pass)
    }
}
