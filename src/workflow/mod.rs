pub mod machine;
pub mod runner;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use machine::{IterationController, ReviewFeedback, WorkflowStateMachine};
pub use runner::WorkflowRunner;
pub use types::{SessionStatus, WorkflowOutcome, WorkflowPhase};
