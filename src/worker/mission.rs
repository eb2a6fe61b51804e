//! Mission step worker: claim, gate through the breaker, execute, report.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::executor::{ExecContext, ExecutorRegistry};
use crate::breaker::CircuitBreaker;
use crate::error::Result;
use crate::llm::TextCompletion;
use crate::mission::StepStatus;
use crate::queue::StepQueue;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing queued.
    Idle,
    Succeeded { step_id: String },
    Failed { step_id: String, reason: String },
}

pub struct MissionWorker {
    store: Store,
    queue: StepQueue,
    breaker: CircuitBreaker,
    executors: Arc<ExecutorRegistry>,
    llm: Arc<dyn TextCompletion>,
    worker_id: String,
    agent_id: String,
}

impl MissionWorker {
    pub fn new(
        store: Store,
        breaker: CircuitBreaker,
        executors: Arc<ExecutorRegistry>,
        llm: Arc<dyn TextCompletion>,
        worker_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            queue: StepQueue::new(store.clone()),
            store,
            breaker,
            executors,
            llm,
            worker_id: worker_id.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Claim and run at most one step. Execution errors are recorded on
    /// the step, never propagated; the worker loop keeps polling.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(step) = self.queue.claim(&self.worker_id, &self.agent_id, None)? else {
            return Ok(PollOutcome::Idle);
        };

        let Some(executor) = self.executors.get(&step.kind) else {
            let reason = format!("no executor registered for step kind '{}'", step.kind);
            return self.fail(&step.id, &reason);
        };

        let service = executor.service();
        if !self.breaker.can_proceed(service)? {
            let reason = format!("circuit breaker open for service '{}'", service);
            return self.fail(&step.id, &reason);
        }

        let ctx = ExecContext {
            store: &self.store,
            llm: self.llm.as_ref(),
            step: &step,
            agent_id: &self.agent_id,
        };
        match executor.execute(&ctx).await {
            Ok(result) => {
                self.breaker.record(service, true)?;
                self.report(&step.id, StepStatus::Succeeded, Some(&result), None)?;
                info!(step_id = %step.id, kind = %step.kind, "step succeeded");
                Ok(PollOutcome::Succeeded { step_id: step.id })
            }
            Err(e) => {
                self.breaker.record(service, false)?;
                let reason = e.to_string();
                self.fail(&step.id, &reason)
            }
        }
    }

    fn fail(&self, step_id: &str, reason: &str) -> Result<PollOutcome> {
        warn!(%step_id, reason, "step execution failed");
        self.report(step_id, StepStatus::Failed, None, Some(reason))?;
        Ok(PollOutcome::Failed {
            step_id: step_id.to_string(),
            reason: reason.to_string(),
        })
    }

    fn report(
        &self,
        step_id: &str,
        status: StepStatus,
        result: Option<&Value>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.queue.report(step_id, status, result, reason)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::breaker::BreakerParams;
    use crate::gate::GateRegistry;
    use crate::llm::{MockCompletion, ScriptedCompletion};
    use crate::mission::{MissionStatus, ProposalSource, ProposedStep};
    use crate::proposal::{ProposalService, SubmitProposal};
    use crate::store::BreakerState;

    fn submit_auto(store: &Store, kind: &str, payload: Value) -> String {
        store
            .policies()
            .upsert(
                "auto_approve",
                &json!({"enabled": true, "allowed_step_kinds": [kind]}),
                None,
            )
            .unwrap();
        let proposals = ProposalService::new(store.clone(), Arc::new(GateRegistry::standard()));
        let outcome = proposals
            .submit(SubmitProposal {
                agent_id: "ava".to_string(),
                title: format!("{} mission", kind),
                description: None,
                proposed_steps: vec![ProposedStep::new(kind, payload)],
                source: ProposalSource::Human,
                source_trace_id: None,
            })
            .unwrap();
        outcome.mission_id.expect("auto-approved mission")
    }

    fn worker(store: &Store, llm: Arc<dyn TextCompletion>) -> MissionWorker {
        MissionWorker::new(
            store.clone(),
            CircuitBreaker::new(store.clone(), BreakerParams::default()),
            Arc::new(ExecutorRegistry::standard()),
            llm,
            "w-1",
            "ava",
        )
    }

    #[tokio::test]
    async fn test_successful_step_finalizes_mission() {
        let store = Store::open_in_memory().unwrap();
        let mission_id = submit_auto(&store, "research", json!({"topic": "rust"}));
        let worker = worker(&store, Arc::new(MockCompletion::new("findings here")));

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Succeeded { .. }));

        let mission = store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Succeeded);
        assert!(matches!(
            worker.poll_once().await.unwrap(),
            PollOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn test_execution_error_fails_step_and_feeds_breaker() {
        let store = Store::open_in_memory().unwrap();
        let mission_id = submit_auto(&store, "research", json!({"topic": "rust"}));
        // Empty script: the completion call errors.
        let worker = worker(&store, Arc::new(ScriptedCompletion::new(Vec::<String>::new())));

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Failed { .. }));

        let mission = store.missions().get(&mission_id).unwrap().unwrap();
        assert_eq!(mission.status, MissionStatus::Failed);
        let row = store.breakers().get_or_default("llm").unwrap();
        assert_eq!(row.failure_count, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_executing() {
        let store = Store::open_in_memory().unwrap();
        submit_auto(&store, "research", json!({"topic": "rust"}));
        let breaker = CircuitBreaker::new(store.clone(), BreakerParams::default());
        for _ in 0..3 {
            breaker.record("llm", false).unwrap();
        }
        assert_eq!(breaker.state("llm").unwrap().state, BreakerState::Open);

        let worker = worker(&store, Arc::new(MockCompletion::new("never used")));
        let outcome = worker.poll_once().await.unwrap();
        match outcome {
            PollOutcome::Failed { reason, .. } => {
                assert!(reason.contains("circuit breaker open"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_with_reason() {
        let store = Store::open_in_memory().unwrap();
        submit_auto(&store, "deploy", json!({"target": "prod"}));
        let worker = worker(&store, Arc::new(MockCompletion::default()));

        match worker.poll_once().await.unwrap() {
            PollOutcome::Failed { reason, .. } => {
                assert!(reason.contains("no executor registered"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
