//! Single entry point for proposal creation.
//!
//! Every producer (human API, trigger, reaction, conversation action item,
//! initiative) funnels through [`ProposalService::submit`]. Gate rejections
//! are persisted and audited, never silently dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::gate::{GateDecision, GateRegistry};
use crate::mission::{ProposalSource, ProposalStatus, ProposedStep, StepKind};
use crate::store::{NewEvent, NewProposal, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitProposal {
    pub agent_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub proposed_steps: Vec<ProposedStep>,
    #[serde(default)]
    pub source: ProposalSource,
    #[serde(default)]
    pub source_trace_id: Option<String>,
}

/// What happened to a submission. Rejections are normal terminal outcomes,
/// not errors.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalOutcome {
    pub success: bool,
    pub proposal_id: Option<String>,
    pub mission_id: Option<String>,
    pub auto_approved: bool,
    pub reason: Option<String>,
    /// True when a prior submission with the same trace id was returned.
    pub deduplicated: bool,
}

impl ProposalOutcome {
    fn rejected(proposal_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            proposal_id,
            mission_id: None,
            auto_approved: false,
            reason: Some(reason.into()),
            deduplicated: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProposalPolicy {
    max_per_agent_per_day: u64,
}

impl Default for ProposalPolicy {
    fn default() -> Self {
        Self {
            max_per_agent_per_day: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AutoApprovePolicy {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    allowed_step_kinds: Vec<String>,
}

pub struct ProposalService {
    store: Store,
    gates: Arc<GateRegistry>,
}

impl ProposalService {
    pub fn new(store: Store, gates: Arc<GateRegistry>) -> Self {
        Self { store, gates }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run a submission through dedup, the daily ceiling, the gate
    /// registry, and the auto-approve policy.
    pub fn submit(&self, req: SubmitProposal) -> Result<ProposalOutcome> {
        if req.proposed_steps.is_empty() {
            return Err(FleetError::validation("proposed_steps must not be empty"));
        }
        for step in &req.proposed_steps {
            step.kind
                .validate_payload(&step.payload)
                .map_err(FleetError::validation)?;
        }

        // Idempotent replay: a known trace id returns the prior result.
        if let Some(trace) = req.source_trace_id.as_deref() {
            if let Some(prior) = self.store.proposals().find_by_trace(trace)? {
                return self.replay_outcome(prior);
            }
        }

        let policy: ProposalPolicy = self
            .store
            .policies()
            .get_or("proposal_policy", ProposalPolicy::default())?;
        let today = self.store.proposals().count_for_agent_today(&req.agent_id)?;
        if today >= policy.max_per_agent_per_day {
            // Ceiling hits are not persisted; the agent is already at cap.
            return Ok(ProposalOutcome::rejected(
                None,
                format!(
                    "Daily proposal limit reached ({}/{})",
                    today, policy.max_per_agent_per_day
                ),
            ));
        }

        let kinds: Vec<StepKind> = req.proposed_steps.iter().map(|s| s.kind.clone()).collect();
        if let GateDecision::Reject { reason } = self.gates.check_all(&kinds, &self.store)? {
            let rejected = self.store.proposals().insert(NewProposal {
                agent_id: req.agent_id.clone(),
                title: req.title.clone(),
                description: req.description.clone(),
                proposed_steps: req.proposed_steps.clone(),
                source: req.source,
                source_trace_id: req.source_trace_id.clone(),
                status: ProposalStatus::Rejected,
                rejection_reason: Some(reason.clone()),
            })?;
            warn!(proposal_id = %rejected.id, agent_id = %req.agent_id, %reason, "proposal gated");
            self.store.events().emit(
                NewEvent::new(&req.agent_id, "proposal_rejected", &req.title)
                    .with_summary(&reason),
            )?;
            return Ok(ProposalOutcome::rejected(Some(rejected.id), reason));
        }

        let auto: AutoApprovePolicy = self
            .store
            .policies()
            .get_or("auto_approve", AutoApprovePolicy::default())?;
        let auto_approved = auto.enabled
            && kinds
                .iter()
                .all(|k| auto.allowed_step_kinds.iter().any(|a| a == k.as_str()));

        let status = if auto_approved {
            ProposalStatus::Accepted
        } else {
            ProposalStatus::Pending
        };
        let proposal = self.store.proposals().insert(NewProposal {
            agent_id: req.agent_id.clone(),
            title: req.title.clone(),
            description: req.description.clone(),
            proposed_steps: req.proposed_steps.clone(),
            source: req.source,
            source_trace_id: req.source_trace_id.clone(),
            status,
            rejection_reason: None,
        })?;

        let mission_id = if auto_approved {
            let id = self.materialize(&proposal.id, &req)?;
            self.store.events().emit(
                NewEvent::new(&req.agent_id, "mission_auto_created", &req.title)
                    .with_metadata(serde_json::json!({"mission_id": id})),
            )?;
            info!(proposal_id = %proposal.id, mission_id = %id, "proposal auto-approved");
            Some(id)
        } else {
            info!(proposal_id = %proposal.id, agent_id = %req.agent_id, "proposal pending review");
            None
        };

        Ok(ProposalOutcome {
            success: true,
            proposal_id: Some(proposal.id),
            mission_id,
            auto_approved,
            reason: None,
            deduplicated: false,
        })
    }

    /// Manual review: accept a pending proposal and materialize its
    /// mission.
    pub fn approve(&self, proposal_id: &str, reviewer: &str) -> Result<ProposalOutcome> {
        let proposal = self
            .store
            .proposals()
            .get(proposal_id)?
            .ok_or_else(|| FleetError::not_found(format!("proposal {}", proposal_id)))?;
        if !self
            .store
            .proposals()
            .set_status(proposal_id, ProposalStatus::Accepted, None)?
        {
            return Err(FleetError::conflict(format!(
                "proposal {} is not pending",
                proposal_id
            )));
        }

        let mission_id = self.materialize(
            proposal_id,
            &SubmitProposal {
                agent_id: proposal.agent_id.clone(),
                title: proposal.title.clone(),
                description: proposal.description.clone(),
                proposed_steps: proposal.proposed_steps.clone(),
                source: proposal.source,
                source_trace_id: None,
            },
        )?;
        info!(%proposal_id, %mission_id, %reviewer, "proposal approved");
        Ok(ProposalOutcome {
            success: true,
            proposal_id: Some(proposal_id.to_string()),
            mission_id: Some(mission_id),
            auto_approved: false,
            reason: None,
            deduplicated: false,
        })
    }

    pub fn reject(&self, proposal_id: &str, reason: &str) -> Result<()> {
        if !self
            .store
            .proposals()
            .set_status(proposal_id, ProposalStatus::Rejected, Some(reason))?
        {
            return Err(FleetError::conflict(format!(
                "proposal {} is not pending",
                proposal_id
            )));
        }
        info!(%proposal_id, %reason, "proposal rejected");
        Ok(())
    }

    /// Create the mission and its sequence-numbered queued steps.
    fn materialize(&self, proposal_id: &str, req: &SubmitProposal) -> Result<String> {
        let mission = self.store.missions().insert(
            &req.title,
            req.description.as_deref(),
            &req.agent_id,
            proposal_id,
        )?;
        self.store
            .steps()
            .insert_batch(&mission.id, &req.proposed_steps)?;
        Ok(mission.id)
    }

    fn replay_outcome(&self, prior: crate::mission::MissionProposal) -> Result<ProposalOutcome> {
        let mission_id = self
            .store
            .missions()
            .find_by_proposal(&prior.id)?
            .map(|m| m.id);
        Ok(ProposalOutcome {
            success: prior.status != ProposalStatus::Rejected,
            auto_approved: prior.status == ProposalStatus::Accepted && mission_id.is_some(),
            mission_id,
            reason: prior.rejection_reason,
            proposal_id: Some(prior.id),
            deduplicated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> ProposalService {
        let store = Store::open_in_memory().unwrap();
        ProposalService::new(store, Arc::new(GateRegistry::standard()))
    }

    fn request(agent: &str, kinds: &[&str]) -> SubmitProposal {
        SubmitProposal {
            agent_id: agent.to_string(),
            title: "look into ai news".to_string(),
            description: None,
            proposed_steps: kinds
                .iter()
                .map(|k| {
                    // Payload each kind's validator accepts.
                    let payload = match *k {
                        "post_tweet" => json!({"content": "ai news roundup"}),
                        "crawl" => json!({"url": "https://example.com"}),
                        "diagnose" => json!({"mission_id": "m-1"}),
                        _ => json!({"topic": "ai"}),
                    };
                    ProposedStep::new(*k, payload)
                })
                .collect(),
            source: ProposalSource::Human,
            source_trace_id: None,
        }
    }

    fn enable_auto_approve(service: &ProposalService, kinds: &[&str]) {
        service
            .store()
            .policies()
            .upsert(
                "auto_approve",
                &json!({"enabled": true, "allowed_step_kinds": kinds}),
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_pending_without_auto_approve() {
        let service = service();
        let out = service.submit(request("ava", &["research"])).unwrap();
        assert!(out.success);
        assert!(!out.auto_approved);
        assert!(out.mission_id.is_none());

        let proposal = service
            .store()
            .proposals()
            .get(out.proposal_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Pending);
    }

    #[test]
    fn test_auto_approve_respects_allow_list() {
        let service = service();
        enable_auto_approve(&service, &["research"]);

        let approved = service.submit(request("ava", &["research"])).unwrap();
        assert!(approved.auto_approved);
        let mission_id = approved.mission_id.unwrap();
        let steps = service.store().steps().for_mission(&mission_id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].seq, 1);

        // A kind outside the allow-list falls back to pending.
        let mixed = service.submit(request("ava", &["research", "analyze"])).unwrap();
        assert!(mixed.success);
        assert!(!mixed.auto_approved);
        assert!(mixed.mission_id.is_none());
    }

    #[test]
    fn test_trace_replay_returns_prior_result() {
        let service = service();
        enable_auto_approve(&service, &["research"]);

        let mut req = request("ava", &["research"]);
        req.source_trace_id = Some("trig:abc".to_string());
        let first = service.submit(req.clone()).unwrap();

        let replay = service.submit(req).unwrap();
        assert!(replay.deduplicated);
        assert_eq!(replay.proposal_id, first.proposal_id);
        assert_eq!(replay.mission_id, first.mission_id);

        // Only one proposal was created.
        let all = service.store().proposals().list(Default::default()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_daily_ceiling_rejects_without_insert() {
        let service = service();
        service
            .store()
            .policies()
            .upsert("proposal_policy", &json!({"max_per_agent_per_day": 1}), None)
            .unwrap();

        service.submit(request("ava", &["research"])).unwrap();
        let capped = service.submit(request("ava", &["research"])).unwrap();
        assert!(!capped.success);
        assert_eq!(
            capped.reason.as_deref(),
            Some("Daily proposal limit reached (1/1)")
        );
        assert!(capped.proposal_id.is_none());

        // Another agent is unaffected.
        let other = service.submit(request("kai", &["research"])).unwrap();
        assert!(other.success);
    }

    #[test]
    fn test_invalid_step_payload_is_a_validation_error() {
        let service = service();
        let mut req = request("ava", &["post_tweet"]);
        req.proposed_steps = vec![ProposedStep::new("post_tweet", json!({"topic": "ai"}))];

        let err = service.submit(req).unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));
        assert!(err
            .to_string()
            .contains("post_tweet step requires a non-empty 'content' field"));

        // Nothing was persisted for a submission that never validated.
        let all = service.store().proposals().list(Default::default()).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_gate_rejection_is_persisted_and_audited() {
        let service = service();
        service
            .store()
            .policies()
            .upsert("x_daily_quota", &json!({"limit": 0}), None)
            .unwrap();

        let out = service.submit(request("ava", &["post_tweet"])).unwrap();
        assert!(!out.success);
        assert_eq!(out.reason.as_deref(), Some("Daily tweet quota reached (0/0)"));

        let rejected = service
            .store()
            .proposals()
            .get(out.proposal_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert!(rejected.reviewed_at.is_some());

        let day_start = crate::store::utc_day_start(chrono::Utc::now());
        assert_eq!(
            service
                .store()
                .events()
                .count_kind_since("proposal_rejected", day_start)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_manual_review_is_exactly_once() {
        let service = service();
        let out = service.submit(request("ava", &["research"])).unwrap();
        let id = out.proposal_id.unwrap();

        let approved = service.approve(&id, "operator").unwrap();
        assert!(approved.mission_id.is_some());

        assert!(service.approve(&id, "operator").is_err());
        assert!(service.reject(&id, "late").is_err());
    }

    #[test]
    fn test_post_tweet_requires_content() {
        let service = service();
        let mut req = request("ava", &[]);
        req.proposed_steps = vec![ProposedStep::new("post_tweet", json!({}))];
        assert!(service.submit(req).is_err());
    }
}
