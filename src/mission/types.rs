use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MissionStatus, ProposalStatus, StepKind, StepStatus};

/// A single proposed unit of work inside a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedStep {
    pub kind: StepKind,
    #[serde(default)]
    pub payload: Value,
}

impl ProposedStep {
    pub fn new(kind: impl Into<StepKind>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Where a proposal came from. Every producer funnels through the
/// proposal service regardless of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    #[default]
    Human,
    Trigger,
    Reaction,
    Conversation,
    Initiative,
    Agent,
}

impl ProposalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Trigger => "trigger",
            Self::Reaction => "reaction",
            Self::Conversation => "conversation",
            Self::Initiative => "initiative",
            Self::Agent => "agent",
        }
    }
}

impl std::str::FromStr for ProposalSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "trigger" => Ok(Self::Trigger),
            "reaction" => Ok(Self::Reaction),
            "conversation" => Ok(Self::Conversation),
            "initiative" => Ok(Self::Initiative),
            "agent" => Ok(Self::Agent),
            other => Err(format!("Invalid proposal source: {}", other)),
        }
    }
}

impl std::fmt::Display for ProposalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A candidate mission awaiting (or past) gating and review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionProposal {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub description: Option<String>,
    pub proposed_steps: Vec<ProposedStep>,
    pub source: ProposalSource,
    pub source_trace_id: Option<String>,
    pub status: ProposalStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// An approved unit of governed work, executed as ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub proposal_id: String,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One sequenced step of a mission. Claimed by at most one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionStep {
    pub id: String,
    pub mission_id: String,
    pub seq: u32,
    pub kind: StepKind,
    pub payload: Value,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub failure_reason: Option<String>,
    pub worker_id: Option<String>,
    pub executor_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
