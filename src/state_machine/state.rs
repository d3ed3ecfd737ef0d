use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::JobRun;
use crate::markers::Terminal;

/// The run-state machine.
///
/// Each run flows through: INITIALIZING → EXECUTING(step i of N)… → DONE | ABORTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Initializing,
    Executing {
        /// Step index being executed.
        step: usize,
        /// 1-based position of the step within this run.
        position: usize,
        total: usize,
    },
    Finalizing(Terminal),
}

impl RunState {
    pub fn terminal(&self) -> Option<Terminal> {
        match self {
            RunState::Finalizing(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => write!(f, "INITIALIZING"),
            RunState::Executing {
                step,
                position,
                total,
            } => write!(f, "EXECUTING(step {step}, {position}/{total})"),
            RunState::Finalizing(t) => write!(f, "{t}"),
        }
    }
}

/// Inputs that move a run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// The next step in the run's index list starts.
    StepStarted,
    /// The run ends.
    Finished(Terminal),
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next state.
    Next(RunState),
    /// The event does not apply in the current state. The run is unchanged.
    Rejected { from: RunState, event: RunEvent },
}

/// Drives a `JobRun` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next transition for the given run.
    ///
    /// - `StepStarted` moves to the next index in `run.indices`, strictly in
    ///   order; it is rejected once every index has started.
    /// - `Finished(Done)` is only accepted after the last step started (or
    ///   straight from `Initializing` for an empty run).
    /// - `Finished(Aborted)` is accepted from any non-final state.
    /// - `Finalizing` is terminal and rejects everything.
    pub fn next(run: &mut JobRun, event: RunEvent) -> Transition {
        let total = run.indices.len();
        let next = match (run.state, event) {
            (RunState::Finalizing(_), _) => None,
            (RunState::Initializing, RunEvent::StepStarted) => {
                run.indices.first().map(|&step| RunState::Executing {
                    step,
                    position: 1,
                    total,
                })
            }
            (RunState::Executing { position, .. }, RunEvent::StepStarted) => {
                run.indices.get(position).map(|&step| RunState::Executing {
                    step,
                    position: position + 1,
                    total,
                })
            }
            (RunState::Initializing, RunEvent::Finished(Terminal::Done)) if total == 0 => {
                Some(RunState::Finalizing(Terminal::Done))
            }
            (RunState::Executing { position, .. }, RunEvent::Finished(Terminal::Done))
                if position == total =>
            {
                Some(RunState::Finalizing(Terminal::Done))
            }
            (_, RunEvent::Finished(Terminal::Aborted)) => {
                Some(RunState::Finalizing(Terminal::Aborted))
            }
            (_, RunEvent::Finished(Terminal::Done)) => None,
        };

        match next {
            Some(state) => {
                run.state_history.push(run.state);
                run.state = state;
                Transition::Next(state)
            }
            None => Transition::Rejected {
                from: run.state,
                event,
            },
        }
    }
}
