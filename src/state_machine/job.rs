use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;
use crate::company::CompanyKey;
use crate::markers::Terminal;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for linear backoff.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after a failed attempt using linear backoff.
    /// delay = backoff * attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Whether another attempt follows `attempt`.
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One background run of the query sequence for a company.
///
/// Never persisted: on disk a job only exists as markers plus step outputs.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: Uuid,
    pub company: CompanyKey,
    /// Step indices to execute, in order.
    pub indices: Vec<usize>,
    /// Session token carried from one step to the next.
    pub conversation_id: Option<String>,
    pub state: RunState,
    pub state_history: Vec<RunState>,
    /// Steps whose output ended up blank after all attempts.
    pub blank_steps: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    pub fn new(id: Uuid, company: CompanyKey, indices: Vec<usize>) -> Self {
        Self {
            id,
            company,
            indices,
            conversation_id: None,
            state: RunState::Initializing,
            state_history: Vec::new(),
            blank_steps: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Structured record produced when a run finalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub job_id: Uuid,
    pub company: String,
    pub terminal: Option<Terminal>,
    pub steps: Vec<usize>,
    pub blank_steps: Vec<usize>,
    pub state_transitions: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunSummary {
    pub fn from_run(run: &JobRun) -> Self {
        let now = Utc::now();
        let duration = now - run.created_at;
        let mut transitions = run.state_history.clone();
        transitions.push(run.state);

        Self {
            job_id: run.id,
            company: run.company.to_string(),
            terminal: run.state.terminal(),
            steps: run.indices.clone(),
            blank_steps: run.blank_steps.clone(),
            state_transitions: transitions,
            started_at: run.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
