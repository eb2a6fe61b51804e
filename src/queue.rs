//! Claim-execute-complete state machine over mission steps.
//!
//! The queue owns the mission status roll-up: a mission turns `running`
//! when its first step is claimed, and is finalized from its steps'
//! terminal statuses once the last one completes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::mission::{MissionStatus, MissionStep, StepKind, StepStatus};
use crate::store::{NewEvent, Store};

pub struct StepQueue {
    store: Store,
}

impl StepQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Claim the oldest queued step for a worker. The parent mission is
    /// moved `approved → running` on its first claimed step.
    pub fn claim(
        &self,
        worker_id: &str,
        executor_agent: &str,
        allowed_kinds: Option<&[StepKind]>,
    ) -> Result<Option<MissionStep>> {
        let Some(step) = self
            .store
            .steps()
            .claim_next(worker_id, executor_agent, allowed_kinds)?
        else {
            return Ok(None);
        };
        if self.store.missions().mark_running_if_approved(&step.mission_id)? {
            info!(mission_id = %step.mission_id, "mission started");
        }
        info!(step_id = %step.id, kind = %step.kind, %worker_id, "step claimed");
        Ok(Some(step))
    }

    /// Record a step's terminal outcome and roll the mission up if every
    /// sibling is now terminal.
    pub fn report(
        &self,
        step_id: &str,
        status: StepStatus,
        result: Option<&Value>,
        failure_reason: Option<&str>,
    ) -> Result<Option<MissionStatus>> {
        if !status.is_terminal() {
            return Err(FleetError::validation(format!(
                "cannot report non-terminal step status '{}'",
                status
            )));
        }
        let step = self
            .store
            .steps()
            .get(step_id)?
            .ok_or_else(|| FleetError::not_found(format!("step {}", step_id)))?;
        self.store
            .steps()
            .complete(step_id, status, result, failure_reason)?;
        if status == StepStatus::Failed {
            warn!(%step_id, reason = failure_reason.unwrap_or("unspecified"), "step failed");
        }
        self.finalize_if_done(&step.mission_id)
    }

    /// Manual retry: a terminal step goes back to `queued` with its
    /// outcome cleared. The mission also leaves its terminal state if it
    /// had already been finalized.
    pub fn retry(&self, step_id: &str) -> Result<()> {
        let step = self
            .store
            .steps()
            .get(step_id)?
            .ok_or_else(|| FleetError::not_found(format!("step {}", step_id)))?;
        if !self.store.steps().retry(step_id)? {
            return Err(FleetError::conflict(format!(
                "step {} is not in a terminal status",
                step_id
            )));
        }
        self.store.missions().reopen(&step.mission_id)?;
        info!(%step_id, mission_id = %step.mission_id, "step requeued");
        Ok(())
    }

    /// Force-fail steps running since before `cutoff` and roll up their
    /// missions. Used by the heartbeat's stale-work recovery pass.
    pub fn recover_stale(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<usize> {
        let failed = self.store.steps().fail_stale(cutoff, reason)?;
        for step in &failed {
            warn!(step_id = %step.id, mission_id = %step.mission_id, "stale step recovered");
            self.finalize_if_done(&step.mission_id)?;
        }
        Ok(failed.len())
    }

    fn finalize_if_done(&self, mission_id: &str) -> Result<Option<MissionStatus>> {
        let statuses = self.store.steps().sibling_statuses(mission_id)?;
        if statuses.iter().any(|s| !s.is_terminal()) {
            return Ok(None);
        }
        let outcome = if statuses.contains(&StepStatus::Failed) {
            MissionStatus::Failed
        } else {
            MissionStatus::Succeeded
        };
        if !self.store.missions().finalize(mission_id, outcome)? {
            // Already finalized by a concurrent reporter.
            return Ok(Some(outcome));
        }
        let mission = self
            .store
            .missions()
            .get(mission_id)?
            .ok_or_else(|| FleetError::not_found(format!("mission {}", mission_id)))?;
        let kind = match outcome {
            MissionStatus::Failed => "mission_failed",
            _ => "mission_succeeded",
        };
        self.store.events().emit(
            NewEvent::new(&mission.created_by, kind, &mission.title)
                .with_metadata(serde_json::json!({"mission_id": mission_id})),
        )?;
        info!(%mission_id, status = %outcome, "mission finalized");
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::ProposedStep;
    use serde_json::json;

    fn queue_with_mission(kinds: &[&str]) -> (StepQueue, String) {
        let store = Store::open_in_memory().unwrap();
        let mission = store.missions().insert("m", None, "ava", "p-1").unwrap();
        let steps: Vec<ProposedStep> = kinds
            .iter()
            .map(|k| ProposedStep::new(*k, json!({"topic": "t"})))
            .collect();
        store.steps().insert_batch(&mission.id, &steps).unwrap();
        (StepQueue::new(store.clone()), mission.id)
    }

    #[test]
    fn test_first_claim_starts_mission() {
        let (queue, mission_id) = queue_with_mission(&["research"]);
        queue.claim("w1", "ava", None).unwrap().unwrap();
        let mission = queue.store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Running);
        assert!(mission.started_at.is_some());
    }

    #[test]
    fn test_rollup_waits_for_all_siblings() {
        let (queue, mission_id) = queue_with_mission(&["research", "analyze"]);
        let first = queue.claim("w1", "ava", None).unwrap().unwrap();

        let rolled = queue
            .report(&first.id, StepStatus::Succeeded, Some(&json!({"ok": true})), None)
            .unwrap();
        assert!(rolled.is_none());

        let second = queue.claim("w1", "ava", None).unwrap().unwrap();
        let rolled = queue
            .report(&second.id, StepStatus::Succeeded, None, None)
            .unwrap();
        assert_eq!(rolled, Some(MissionStatus::Succeeded));

        let mission = queue.store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Succeeded);
        assert!(mission.completed_at.is_some());
    }

    #[test]
    fn test_any_failed_step_fails_the_mission() {
        let (queue, mission_id) = queue_with_mission(&["research", "analyze"]);
        let first = queue.claim("w1", "ava", None).unwrap().unwrap();
        queue
            .report(&first.id, StepStatus::Failed, None, Some("fetch timed out"))
            .unwrap();
        let second = queue.claim("w1", "ava", None).unwrap().unwrap();
        let rolled = queue
            .report(&second.id, StepStatus::Succeeded, None, None)
            .unwrap();
        assert_eq!(rolled, Some(MissionStatus::Failed));

        // The failure event carries the mission id.
        let day_start = crate::store::utc_day_start(Utc::now());
        assert_eq!(
            queue
                .store
                .events()
                .count_kind_since("mission_failed", day_start)
                .unwrap(),
            1
        );
        let mission = queue.store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Failed);
    }

    #[test]
    fn test_skipped_steps_do_not_fail_the_mission() {
        let (queue, _) = queue_with_mission(&["research"]);
        let step = queue.claim("w1", "ava", None).unwrap().unwrap();
        let rolled = queue.report(&step.id, StepStatus::Skipped, None, None).unwrap();
        assert_eq!(rolled, Some(MissionStatus::Succeeded));
    }

    #[test]
    fn test_retry_reopens_finalized_mission() {
        let (queue, mission_id) = queue_with_mission(&["research"]);
        let step = queue.claim("w1", "ava", None).unwrap().unwrap();
        queue
            .report(&step.id, StepStatus::Failed, None, Some("boom"))
            .unwrap();

        queue.retry(&step.id).unwrap();
        let mission = queue.store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Running);

        let reclaimed = queue.claim("w2", "ava", None).unwrap().unwrap();
        assert_eq!(reclaimed.id, step.id);
    }

    #[test]
    fn test_stale_recovery_rolls_up() {
        let (queue, mission_id) = queue_with_mission(&["research"]);
        queue.claim("w1", "ava", None).unwrap().unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let recovered = queue
            .recover_stale(cutoff, "Stale - exceeded 30 min timeout")
            .unwrap();
        assert_eq!(recovered, 1);

        let mission = queue.store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Failed);
        let steps = queue.store.steps().for_mission(&mission_id).unwrap();
        assert_eq!(
            steps[0].failure_reason.as_deref(),
            Some("Stale - exceeded 30 min timeout")
        );
    }
}
