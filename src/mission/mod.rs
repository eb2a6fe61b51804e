//! Mission domain types: proposals, missions, steps, and their state machines.

mod kind;
mod status;
mod types;

pub use kind::StepKind;
pub use status::{MissionStatus, ProposalStatus, StepStatus};
pub use types::{Mission, MissionProposal, MissionStep, ProposalSource, ProposedStep};
