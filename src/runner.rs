use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::company::CompanyKey;
use crate::config::BriefrunConfig;
use crate::dify::{ChatRequest, DifyApi, DifyError};
use crate::error::{BriefrunError, Result};
use crate::markers::{HeartbeatThrottle, MarkerSet, Terminal};
use crate::outputs::OutputStore;
use crate::state_machine::{JobRun, RetryPolicy, RunEvent, RunSummary, StateMachine, Transition};
use crate::steps::StepCatalog;

/// Pacing and identity settings for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub inter_query_delay: Duration,
    pub heartbeat_interval: Duration,
    pub user_id: String,
}

impl RunSettings {
    pub fn from_config(config: &BriefrunConfig) -> Self {
        Self {
            retry: config.step_retry(),
            inter_query_delay: config.inter_query_delay(),
            heartbeat_interval: config.heartbeat_interval(),
            user_id: config.user_id.clone(),
        }
    }
}

/// Answer of one step after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StepAnswer {
    text: String,
    /// Session id to carry forward; only set when the answer is non-blank.
    conversation_id: Option<String>,
}

/// Writes `aborted` when dropped unless resolved first, so a run that
/// panics or whose task is cancelled never stays marked as running.
struct FinalizeGuard {
    markers: MarkerSet,
    armed: bool,
}

impl FinalizeGuard {
    fn new(markers: MarkerSet) -> Self {
        Self {
            markers,
            armed: true,
        }
    }

    fn resolve(mut self, terminal: Terminal) {
        self.armed = false;
        self.markers.finish(terminal);
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.markers.finish(Terminal::Aborted);
        }
    }
}

/// Executes the query sequence of one job against the chat endpoint.
pub struct JobRunner<C> {
    client: Arc<C>,
    store: OutputStore,
    catalog: StepCatalog,
    settings: RunSettings,
}

impl<C: DifyApi> JobRunner<C> {
    pub fn new(client: Arc<C>, store: OutputStore, catalog: StepCatalog, settings: RunSettings) -> Self {
        Self {
            client,
            store,
            catalog,
            settings,
        }
    }

    /// Run every step of `run`, then finalize the markers.
    ///
    /// Per-step upstream failures degrade to blank artifacts. Anything else
    /// that escapes the step loop finalizes as `Aborted`.
    pub async fn run(&self, mut run: JobRun) -> RunSummary {
        let markers = self.store.markers(&run.company);
        let guard = FinalizeGuard::new(markers.clone());

        info!(company = %run.company, job_id = %run.id, steps = ?run.indices, "job started");
        let terminal = match self.execute(&mut run, &markers).await {
            Ok(()) => Terminal::Done,
            Err(e) => {
                error!(company = %run.company, job_id = %run.id, error = %e, state = %run.state, "job aborted");
                Terminal::Aborted
            }
        };
        guard.resolve(terminal);

        if let Transition::Rejected { from, .. } =
            StateMachine::next(&mut run, RunEvent::Finished(terminal))
        {
            warn!(job_id = %run.id, state = %from, "unexpected finalization state");
        }

        let summary = RunSummary::from_run(&run);
        info!(
            company = %run.company,
            job_id = %run.id,
            terminal = %terminal,
            blank_steps = ?summary.blank_steps,
            duration_ms = summary.duration_ms,
            "job finished"
        );
        summary
    }

    async fn execute(&self, run: &mut JobRun, markers: &MarkerSet) -> Result<()> {
        self.store.ensure_company_dir(&run.company)?;
        markers.begin()?;

        let total = run.indices.len();
        for position in 1..=total {
            let step = match StateMachine::next(run, RunEvent::StepStarted) {
                Transition::Next(state) => state,
                Transition::Rejected { from, .. } => {
                    return Err(BriefrunError::Internal(format!(
                        "cannot start step {position} from {from}"
                    )));
                }
            };
            let index = run.indices[position - 1];
            let title = self.catalog.title(index).ok_or_else(|| {
                BriefrunError::Internal(format!("step index {index} is out of range"))
            })?;
            info!(company = %run.company, state = %step, %title, "step started");

            markers.touch_heartbeat();
            let answer = self
                .query_step(&run.company, title, run.conversation_id.clone(), markers)
                .await?;

            if answer.text.trim().is_empty() {
                warn!(company = %run.company, step = index, "step produced no text; writing blank output");
                run.blank_steps.push(index);
            }
            if answer.conversation_id.is_some() {
                run.conversation_id = answer.conversation_id;
            }
            self.store.write_step(&run.company, index, &answer.text)?;

            if position < total {
                sleep(self.settings.inter_query_delay).await;
            }
        }
        Ok(())
    }

    /// Ask one query with retries. Blank answers and retryable errors are
    /// retried with linear backoff; the last attempt's text is accepted even
    /// if blank. A missing API key is fatal for the whole job.
    async fn query_step(
        &self,
        company: &CompanyKey,
        title: &str,
        carried: Option<String>,
        markers: &MarkerSet,
    ) -> Result<StepAnswer> {
        let policy = self.settings.retry;
        let mut heartbeat = HeartbeatThrottle::new(markers.clone(), self.settings.heartbeat_interval);
        let mut last_text = String::new();

        for attempt in 1..=policy.max_attempts {
            let req = ChatRequest::new(
                company.as_str(),
                title,
                carried.as_deref(),
                &self.settings.user_id,
            );
            match self.client.stream_chat(&req, &mut heartbeat).await {
                Ok(reply) if !reply.answer.trim().is_empty() => {
                    return Ok(StepAnswer {
                        text: reply.answer,
                        conversation_id: reply.conversation_id,
                    });
                }
                Ok(reply) => {
                    warn!(%company, %title, attempt, "empty answer");
                    last_text = reply.answer;
                }
                Err(e @ DifyError::MissingApiKey(_)) => return Err(e.into()),
                Err(e) if !e.is_retryable() => {
                    warn!(%company, %title, attempt, error = %e, "query rejected; not retrying");
                    break;
                }
                Err(e) => {
                    warn!(%company, %title, attempt, error = %e, "query failed");
                    last_text.clear();
                }
            }

            if policy.has_next(attempt) {
                let delay = policy.delay_for_attempt(attempt);
                info!(%company, %title, attempt, delay_secs = delay.as_secs(), "retrying after backoff");
                sleep(delay).await;
            }
        }

        Ok(StepAnswer {
            text: last_text,
            conversation_id: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dify::{ChatReply, WorkflowRequest};
    use crate::markers::MarkerKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::Instant;
    use uuid::Uuid;

    /// What a scripted chat call does.
    pub(crate) enum ChatStep {
        Reply(ChatReply),
        Fail(DifyError),
        Panic,
    }

    pub(crate) fn answer(text: &str, conversation_id: Option<&str>) -> ChatStep {
        ChatStep::Reply(ChatReply {
            conversation_id: conversation_id.map(String::from),
            answer: text.to_string(),
        })
    }

    /// Chat fake that replays a script and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedChat {
        script: Mutex<VecDeque<ChatStep>>,
        pub(crate) calls: Mutex<Vec<(ChatRequest, Instant)>>,
    }

    impl ScriptedChat {
        pub(crate) fn new(steps: Vec<ChatStep>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl DifyApi for ScriptedChat {
        async fn stream_chat(
            &self,
            req: &ChatRequest,
            heartbeat: &mut HeartbeatThrottle,
        ) -> std::result::Result<ChatReply, DifyError> {
            self.calls.lock().unwrap().push((req.clone(), Instant::now()));
            heartbeat.tick();
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(ChatStep::Reply(reply)) => Ok(reply),
                Some(ChatStep::Fail(e)) => Err(e),
                Some(ChatStep::Panic) => panic!("scripted panic"),
                None => Ok(ChatReply {
                    conversation_id: None,
                    answer: format!("answer to {}", req.query),
                }),
            }
        }

        async fn run_workflow(&self, _req: &WorkflowRequest) -> std::result::Result<String, DifyError> {
            Err(DifyError::MissingApiKey("workflow"))
        }
    }

    pub(crate) fn catalog() -> StepCatalog {
        StepCatalog::new(vec!["overview".into(), "market".into(), "moat".into()])
    }

    pub(crate) fn settings() -> RunSettings {
        RunSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_secs(10),
            },
            inter_query_delay: Duration::from_secs(8),
            heartbeat_interval: Duration::from_secs(15),
            user_id: "tester".into(),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: OutputStore,
        company: CompanyKey,
        client: Arc<ScriptedChat>,
        runner: JobRunner<ScriptedChat>,
    }

    fn fixture(script: Vec<ChatStep>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = OutputStore::new(tmp.path());
        let client = Arc::new(ScriptedChat::new(script));
        let runner = JobRunner::new(client.clone(), store.clone(), catalog(), settings());
        Fixture {
            _tmp: tmp,
            store,
            company: CompanyKey::parse("acme").unwrap(),
            client,
            runner,
        }
    }

    fn job(f: &Fixture, indices: Vec<usize>) -> JobRun {
        JobRun::new(Uuid::new_v4(), f.company.clone(), indices)
    }

    fn assert_finalized(f: &Fixture, terminal: Terminal) {
        let markers = f.store.markers(&f.company);
        let snap = markers.snapshot();
        assert_eq!(snap.terminal(), Some(terminal));
        assert!(snap.done.is_some() != snap.aborted.is_some());
        assert!(!markers.path(MarkerKind::Running).exists());
        assert!(!markers.path(MarkerKind::Heartbeat).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_all_steps_and_carries_conversation() {
        let f = fixture(vec![
            answer("overview text", Some("conv-1")),
            answer("market text", Some("conv-2")),
            answer("moat text", None),
        ]);

        let summary = f.runner.run(job(&f, vec![1, 2, 3])).await;

        assert_eq!(summary.terminal, Some(Terminal::Done));
        assert!(summary.blank_steps.is_empty());
        assert_eq!(f.store.read_step(&f.company, 1).text, "overview text");
        assert_eq!(f.store.read_step(&f.company, 3).markdown, "moat text");
        assert_finalized(&f, Terminal::Done);

        let calls = f.client.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0.conversation_id, "");
        // Each non-blank reply's session id is carried to the next step.
        assert_eq!(calls[1].0.conversation_id, "conv-1");
        assert_eq!(calls[2].0.conversation_id, "conv-2");
        assert_eq!(calls[1].0.query, "market");
        assert_eq!(calls[0].0.inputs.company, "acme");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_then_succeeds() {
        let f = fixture(vec![
            answer("one", Some("conv-1")),
            ChatStep::Fail(DifyError::Timeout),
            ChatStep::Fail(DifyError::Timeout),
            answer("two on third try", None),
            answer("three", None),
        ]);

        let summary = f.runner.run(job(&f, vec![1, 2, 3])).await;

        assert_eq!(summary.terminal, Some(Terminal::Done));
        assert_eq!(f.store.read_step(&f.company, 2).text, "two on third try");
        assert_finalized(&f, Terminal::Done);

        let calls = f.client.calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        let gap = |a: usize, b: usize| calls[b].1.duration_since(calls[a].1);
        assert_eq!(gap(0, 1), Duration::from_secs(8));
        assert_eq!(gap(1, 2), Duration::from_secs(10));
        assert_eq!(gap(2, 3), Duration::from_secs(20));
        assert_eq!(gap(3, 4), Duration::from_secs(8));
        // Failed attempts still carry the session from step 1.
        assert!(calls[1..4].iter().all(|(req, _)| req.conversation_id == "conv-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_after_all_attempts_is_written_and_run_continues() {
        let f = fixture(vec![
            answer("  ", None),
            answer("", None),
            answer(" ", None),
            answer("market", None),
        ]);

        let summary = f.runner.run(job(&f, vec![1, 2])).await;

        assert_eq!(summary.terminal, Some(Terminal::Done));
        assert_eq!(summary.blank_steps, vec![1]);
        assert!(f.store.has_step_output(&f.company, 1));
        assert_eq!(f.store.read_step(&f.company, 1).text, " ");
        assert_eq!(f.store.read_step(&f.company, 2).text, "market");
        assert_eq!(f.client.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_rejection_skips_remaining_attempts() {
        let f = fixture(vec![
            ChatStep::Fail(DifyError::Api {
                status: 400,
                message: "bad request".into(),
            }),
            answer("market", None),
        ]);

        let summary = f.runner.run(job(&f, vec![1, 2])).await;

        assert_eq!(summary.terminal, Some(Terminal::Done));
        assert_eq!(summary.blank_steps, vec![1]);
        assert_eq!(f.client.call_count(), 2);
        assert_eq!(f.store.read_step(&f.company, 1).text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_aborts_the_job() {
        let f = fixture(vec![
            answer("overview", None),
            ChatStep::Fail(DifyError::MissingApiKey("chat")),
        ]);

        let summary = f.runner.run(job(&f, vec![1, 2, 3])).await;

        assert_eq!(summary.terminal, Some(Terminal::Aborted));
        assert!(f.store.has_step_output(&f.company, 1));
        assert!(!f.store.has_step_output(&f.company, 2));
        assert!(!f.store.has_step_output(&f.company, 3));
        assert_finalized(&f, Terminal::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_still_finalizes_as_aborted() {
        let f = fixture(vec![ChatStep::Panic]);
        let run = job(&f, vec![1]);
        let runner = Arc::new(f.runner);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(run).await })
        };

        assert!(task.await.unwrap_err().is_panic());

        let markers = f.store.markers(&f.company);
        let snap = markers.snapshot();
        assert_eq!(snap.terminal(), Some(Terminal::Aborted));
        assert_eq!(snap.running, None);
        assert_eq!(snap.heartbeat, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_clears_previous_terminal_marker() {
        let f = fixture(vec![ChatStep::Fail(DifyError::MissingApiKey("chat"))]);
        f.runner.run(job(&f, vec![1])).await;
        assert_finalized(&f, Terminal::Aborted);

        f.runner.run(job(&f, vec![1])).await;
        assert_finalized(&f, Terminal::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_write_aborts_the_job() {
        let f = fixture(vec![answer("overview", None), answer("market", None)]);
        f.store.ensure_company_dir(&f.company).unwrap();
        let (txt, _) = f.store.step_paths(&f.company, 1);
        std::fs::create_dir(&txt).unwrap();

        let summary = f.runner.run(job(&f, vec![1, 2])).await;

        assert_eq!(summary.terminal, Some(Terminal::Aborted));
        assert_eq!(f.client.call_count(), 1);
        assert!(!f.store.has_step_output(&f.company, 2));
        assert_finalized(&f, Terminal::Aborted);
    }
}
