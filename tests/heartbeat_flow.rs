//! Maintenance passes end to end: triggers, reactions, recovery.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use opsfleet::mission::{MissionStatus, ProposalSource, ProposalStatus, ProposedStep, StepStatus};
use opsfleet::proposal::{ProposalService, SubmitProposal};
use opsfleet::store::{NewTriggerRule, ProposalFilter, Store};
use opsfleet::trigger::{TriggerEngine, TriggerOptions};
use opsfleet::{GateRegistry, StepQueue};

fn proposals(store: &Store) -> Arc<ProposalService> {
    Arc::new(ProposalService::new(
        store.clone(),
        Arc::new(GateRegistry::standard()),
    ))
}

fn fail_one_mission(store: &Store, proposals: &ProposalService) -> String {
    store
        .policies()
        .upsert(
            "auto_approve",
            &json!({"enabled": true, "allowed_step_kinds": ["research"]}),
            None,
        )
        .unwrap();
    let outcome = proposals
        .submit(SubmitProposal {
            agent_id: "ava".to_string(),
            title: "doomed mission".to_string(),
            description: None,
            proposed_steps: vec![ProposedStep::new("research", json!({"topic": "x"}))],
            source: ProposalSource::Human,
            source_trace_id: None,
        })
        .unwrap();
    let mission_id = outcome.mission_id.unwrap();

    let queue = StepQueue::new(store.clone());
    let step = queue.claim("w-1", "ava", None).unwrap().unwrap();
    queue
        .report(&step.id, StepStatus::Failed, None, Some("boom"))
        .unwrap();
    assert_eq!(
        store.missions().get(&mission_id).unwrap().unwrap().status,
        MissionStatus::Failed
    );
    mission_id
}

#[test]
fn mission_failed_trigger_proposes_diagnosis() {
    let store = Store::open_in_memory().unwrap();
    let proposals = proposals(&store);
    fail_one_mission(&store, &proposals);

    store
        .triggers()
        .insert(NewTriggerRule {
            name: "diagnose failures".to_string(),
            trigger_event: "mission_failed".to_string(),
            conditions: json!({"threshold": 1, "lookback_minutes": 60}),
            action_config: json!({"agent_id": "kai"}),
            cooldown_minutes: 60,
            enabled: true,
        })
        .unwrap();

    // Leave auto-approve on only for research; diagnose goes to review.
    let mut engine = TriggerEngine::new(
        store.clone(),
        proposals,
        TriggerOptions::default(),
        StdRng::seed_from_u64(1),
    )
    .with_standard_checkers();

    let report = engine.run_once().unwrap();
    assert_eq!(report.fired, 1);

    let pending = store
        .proposals()
        .list(ProposalFilter {
            status: Some(ProposalStatus::Pending),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source, ProposalSource::Trigger);
    assert_eq!(pending[0].agent_id, "kai");

    // Cooldown: an immediate second run does not fire again.
    let report = engine.run_once().unwrap();
    assert_eq!(report.fired, 0);
    assert_eq!(report.on_cooldown, 1);
}

#[test]
fn stale_steps_fail_with_timeout_reason_and_roll_up() {
    let store = Store::open_in_memory().unwrap();
    let proposals = proposals(&store);
    store
        .policies()
        .upsert(
            "auto_approve",
            &json!({"enabled": true, "allowed_step_kinds": ["research"]}),
            None,
        )
        .unwrap();
    let outcome = proposals
        .submit(SubmitProposal {
            agent_id: "ava".to_string(),
            title: "will be abandoned".to_string(),
            description: None,
            proposed_steps: vec![ProposedStep::new("research", json!({"topic": "x"}))],
            source: ProposalSource::Human,
            source_trace_id: None,
        })
        .unwrap();
    let mission_id = outcome.mission_id.unwrap();

    let queue = StepQueue::new(store.clone());
    let step = queue.claim("w-1", "ava", None).unwrap().unwrap();

    // A cutoff in the future treats the just-claimed step as stale.
    let recovered = queue
        .recover_stale(
            Utc::now() + Duration::seconds(5),
            "Stale - exceeded 30 min timeout",
        )
        .unwrap();
    assert_eq!(recovered, 1);

    let step = store.steps().get(&step.id).unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(
        step.failure_reason.as_deref(),
        Some("Stale - exceeded 30 min timeout")
    );
    assert_eq!(
        store.missions().get(&mission_id).unwrap().unwrap().status,
        MissionStatus::Failed
    );
}

#[test]
fn tweet_engagement_trigger_reviews_once() {
    let store = Store::open_in_memory().unwrap();
    let proposals = proposals(&store);

    store.tweets().record("tw-1", 0.4).unwrap();
    store
        .triggers()
        .insert(NewTriggerRule {
            name: "study viral tweets".to_string(),
            trigger_event: "tweet_high_engagement".to_string(),
            conditions: json!({"min_engagement_rate": 0.2}),
            action_config: json!({"agent_id": "ava"}),
            cooldown_minutes: 0,
            enabled: true,
        })
        .unwrap();

    let mut engine = TriggerEngine::new(
        store.clone(),
        proposals,
        TriggerOptions::default(),
        StdRng::seed_from_u64(1),
    )
    .with_standard_checkers();

    assert_eq!(engine.run_once().unwrap().fired, 1);
    // The tweet is marked reviewed; nothing left to fire on.
    assert_eq!(engine.run_once().unwrap().fired, 0);
}
