//! Conversation worker: claims pending roundtables and runs them.

use tracing::warn;

use crate::error::Result;
use crate::roundtable::RoundtableOrchestrator;
use crate::store::{ConversationStatus, Store};

pub struct RoundtableWorker {
    store: Store,
    orchestrator: RoundtableOrchestrator,
}

impl RoundtableWorker {
    pub fn new(store: Store, orchestrator: RoundtableOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Claim and run at most one pending conversation. An orchestration
    /// error fails the conversation rather than poisoning the worker loop.
    pub async fn poll_once(&mut self) -> Result<Option<String>> {
        let Some(conversation) = self.store.roundtable().claim_pending()? else {
            return Ok(None);
        };
        if let Err(e) = self.orchestrator.run(&conversation).await {
            warn!(conversation_id = %conversation.id, error = %e, "conversation failed");
            self.store
                .roundtable()
                .complete(&conversation.id, ConversationStatus::Failed, None, None)?;
        }
        Ok(Some(conversation.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::gate::GateRegistry;
    use crate::llm::ScriptedCompletion;
    use crate::proposal::ProposalService;
    use crate::roundtable::{schedule_conversation, RoundtableOptions};
    use crate::store::ScheduleRequest;
    use crate::voice::VoiceCache;

    fn worker(store: &Store, llm: Arc<ScriptedCompletion>) -> RoundtableWorker {
        let proposals = Arc::new(ProposalService::new(
            store.clone(),
            Arc::new(GateRegistry::standard()),
        ));
        RoundtableWorker::new(
            store.clone(),
            RoundtableOrchestrator::new(
                store.clone(),
                llm,
                proposals,
                Arc::new(VoiceCache::default()),
                RoundtableOptions::default(),
                StdRng::seed_from_u64(11),
            ),
        )
    }

    #[tokio::test]
    async fn test_idle_when_nothing_pending() {
        let store = Store::open_in_memory().unwrap();
        let llm = Arc::new(ScriptedCompletion::new(Vec::<String>::new()));
        let mut worker = worker(&store, llm);
        assert!(worker.poll_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orchestration_error_fails_conversation() {
        let store = Store::open_in_memory().unwrap();
        let scheduled = schedule_conversation(
            &store,
            &ScheduleRequest {
                format: "watercooler".to_string(),
                topic: "coffee".to_string(),
                participants: vec!["ava".to_string(), "kai".to_string()],
            },
        )
        .unwrap();

        // Empty script: the first turn's completion call errors.
        let llm = Arc::new(ScriptedCompletion::new(Vec::<String>::new()));
        let mut worker = worker(&store, llm);
        let claimed = worker.poll_once().await.unwrap();
        assert_eq!(claimed.as_deref(), Some(scheduled.id.as_str()));

        let conversation = store.roundtable().get(&scheduled.id).unwrap().unwrap();
        assert_eq!(conversation.status, ConversationStatus::Failed);
    }
}
