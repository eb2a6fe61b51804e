//! Background workers and their scheduling.

mod executor;
mod mission;
mod roundtable;
mod task;

pub use executor::{ExecContext, ExecutorRegistry, StepExecutor};
pub use mission::{MissionWorker, PollOutcome};
pub use roundtable::RoundtableWorker;
pub use task::ScheduledTask;
