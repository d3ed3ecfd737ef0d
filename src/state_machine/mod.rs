mod job;
mod state;

pub use job::{JobRun, RetryPolicy, RunSummary};
pub use state::{RunEvent, RunState, StateMachine, Transition};
