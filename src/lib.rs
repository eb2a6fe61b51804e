pub mod api;
pub mod breaker;
pub mod config;
pub mod error;
pub mod gate;
pub mod heartbeat;
pub mod llm;
pub mod mission;
pub mod proposal;
pub mod queue;
pub mod reaction;
pub mod roundtable;
pub mod store;
pub mod trigger;
pub mod voice;
pub mod worker;

pub use breaker::{BreakerParams, CircuitBreaker};
pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use gate::{CapGate, GateDecision, GateRegistry};
pub use heartbeat::{Heartbeat, HeartbeatReport};
pub use llm::{CompletionRequest, MockCompletion, ScriptedCompletion, TextCompletion};
pub use mission::{Mission, MissionStatus, MissionStep, ProposedStep, StepKind, StepStatus};
pub use proposal::{ProposalOutcome, ProposalService, SubmitProposal};
pub use queue::StepQueue;
pub use reaction::{ReactionEngine, ReactionOptions};
pub use roundtable::{ConversationScheduler, RoundtableOrchestrator, RoundtableOptions};
pub use store::Store;
pub use trigger::{TriggerEngine, TriggerOptions};
pub use voice::VoiceCache;
pub use worker::{ExecutorRegistry, MissionWorker, RoundtableWorker, ScheduledTask};
