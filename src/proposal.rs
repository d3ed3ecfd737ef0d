//! Builds the composite proposal for a company from its step outputs, one
//! workflow call per non-blank step file.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::cleanup;
use crate::company::CompanyKey;
use crate::config::BriefrunConfig;
use crate::dify::{DifyApi, DifyError, WorkflowRequest};
use crate::error::{BriefrunError, Result};
use crate::outputs::{OutputStore, ProgressStatus, ProposalProgress};
use crate::state_machine::RetryPolicy;
use crate::steps::StepCatalog;

const PART_SEPARATOR: &str = "\n\n";

pub struct ProposalBuilder<C> {
    client: Arc<C>,
    store: OutputStore,
    catalog: StepCatalog,
    retry: RetryPolicy,
    user_id: String,
    workflow_configured: bool,
}

impl<C: DifyApi> ProposalBuilder<C> {
    pub fn new(client: Arc<C>, store: OutputStore, catalog: StepCatalog, config: &BriefrunConfig) -> Self {
        Self {
            client,
            store,
            catalog,
            retry: config.proposal_retry(),
            user_id: config.user_id.clone(),
            workflow_configured: !config.workflow_api_key.trim().is_empty(),
        }
    }

    /// Return the proposal for `company`, building it if there is no cached
    /// copy or `force` is set.
    pub async fn create(&self, company: &CompanyKey, force: bool) -> Result<String> {
        if !self.workflow_configured {
            return Err(BriefrunError::Config("workflow API key is not configured".into()));
        }
        if !self.store.company_dir(company).is_dir() {
            return Err(BriefrunError::NotFound(format!("company '{company}'")));
        }

        if !force && let Some(cached) = self.store.read_proposal(company) {
            info!(%company, "returning cached proposal");
            self.store.clear_progress(company);
            return Ok(cached);
        }

        let research: Vec<(usize, String)> = self
            .catalog
            .indices()
            .filter_map(|i| {
                let text = self.store.read_step(company, i).text;
                let text = text.trim();
                (!text.is_empty()).then(|| (i, text.to_string()))
            })
            .collect();
        if research.is_empty() {
            return Err(BriefrunError::InvalidArgument(format!(
                "no research data found for company '{company}'"
            )));
        }

        match self.build(company, &research).await {
            Ok(proposal) => {
                self.store.clear_progress(company);
                Ok(proposal)
            }
            Err(e) => {
                let mut progress = ProposalProgress::idle(ProgressStatus::Error);
                progress.current = research.len();
                progress.total = research.len();
                progress.message = Some(e.public_message());
                self.store.write_progress(company, &progress);
                Err(e)
            }
        }
    }

    async fn build(&self, company: &CompanyKey, research: &[(usize, String)]) -> Result<String> {
        let total = research.len();
        let mut progress = ProposalProgress {
            current: 0,
            total,
            status: ProgressStatus::Processing,
            message: None,
        };
        self.store.write_progress(company, &progress);

        let mut parts = Vec::with_capacity(total);
        for (position, (index, content)) in research.iter().enumerate() {
            progress.current = position + 1;
            self.store.write_progress(company, &progress);
            info!(%company, step = index, file = position + 1, total, "processing research file");

            let req = WorkflowRequest::new(cleanup::remove_urls(content), &self.user_id);
            match self.run_with_retry(company, *index, &req).await {
                Ok(text) if !text.trim().is_empty() => parts.push(text.trim().to_string()),
                Ok(_) => warn!(%company, step = index, "workflow returned no text; skipping file"),
                Err(e) => warn!(%company, step = index, error = %e, "workflow failed; skipping file"),
            }
        }

        let proposal = parts.join(PART_SEPARATOR);
        if proposal.trim().is_empty() {
            return Err(DifyError::Workflow("all research files failed".into()).into());
        }

        self.store.write_proposal(company, &proposal)?;
        info!(%company, parts = parts.len(), total, chars = proposal.chars().count(), "proposal created");
        Ok(proposal)
    }

    async fn run_with_retry(
        &self,
        company: &CompanyKey,
        index: usize,
        req: &WorkflowRequest,
    ) -> std::result::Result<String, DifyError> {
        let mut attempt = 1;
        loop {
            match self.client.run_workflow(req).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && self.retry.has_next(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(%company, step = index, attempt, error = %e, delay_secs = delay.as_secs(), "workflow call failed; retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Progress of a proposal build, derived from what is on disk.
    pub fn progress(&self, company: &CompanyKey) -> ProposalProgress {
        if !self.store.company_dir(company).is_dir() {
            return ProposalProgress::idle(ProgressStatus::NotStarted);
        }
        if self.store.read_proposal(company).is_some() {
            self.store.clear_progress(company);
            return ProposalProgress::idle(ProgressStatus::Completed);
        }
        self.store
            .read_progress(company)
            .unwrap_or_else(|| ProposalProgress::idle(ProgressStatus::NotStarted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dify::{ChatReply, ChatRequest};
    use crate::markers::HeartbeatThrottle;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedWorkflow {
        script: Mutex<VecDeque<std::result::Result<String, DifyError>>>,
        inputs: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedWorkflow {
        fn new(script: Vec<std::result::Result<String, DifyError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                inputs: Mutex::new(Vec::new()),
            }
        }

        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    impl DifyApi for ScriptedWorkflow {
        async fn stream_chat(
            &self,
            _req: &ChatRequest,
            _heartbeat: &mut HeartbeatThrottle,
        ) -> std::result::Result<ChatReply, DifyError> {
            Err(DifyError::MissingApiKey("chat"))
        }

        async fn run_workflow(&self, req: &WorkflowRequest) -> std::result::Result<String, DifyError> {
            self.inputs
                .lock()
                .unwrap()
                .push((req.inputs.research_out.clone(), Instant::now()));
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(format!("proposal for: {}", req.inputs.research_out)))
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: OutputStore,
        company: CompanyKey,
        client: Arc<ScriptedWorkflow>,
        builder: ProposalBuilder<ScriptedWorkflow>,
    }

    fn fixture(script: Vec<std::result::Result<String, DifyError>>, workflow_key: &str) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = OutputStore::new(tmp.path());
        let config = BriefrunConfig {
            workflow_api_key: workflow_key.into(),
            queries: vec!["overview".into(), "market".into(), "moat".into()],
            ..Default::default()
        };
        let catalog = StepCatalog::new(config.queries.clone());
        let client = Arc::new(ScriptedWorkflow::new(script));
        let builder = ProposalBuilder::new(client.clone(), store.clone(), catalog, &config);
        let company = CompanyKey::parse("acme").unwrap();
        store.ensure_company_dir(&company).unwrap();
        Fixture {
            _tmp: tmp,
            store,
            company,
            client,
            builder,
        }
    }

    #[tokio::test]
    async fn builds_from_non_blank_steps_in_order() {
        let f = fixture(vec![Ok("part one".into()), Ok(" part three \n".into())], "wf-key");
        f.store.write_step(&f.company, 1, "overview (https://example.com/a) text").unwrap();
        f.store.write_step(&f.company, 2, "   ").unwrap();
        f.store.write_step(&f.company, 3, "moat text").unwrap();

        let proposal = f.builder.create(&f.company, false).await.unwrap();

        assert_eq!(proposal, "part one\n\npart three");
        assert_eq!(f.client.inputs(), vec!["overview text", "moat text"]);
        assert_eq!(f.store.read_proposal(&f.company).as_deref(), Some(proposal.as_str()));
        let (_, md) = f.store.proposal_paths(&f.company);
        assert!(md.exists());
        assert!(!f.store.progress_path(&f.company).exists());
    }

    #[tokio::test]
    async fn cached_proposal_is_returned_unless_forced() {
        let f = fixture(vec![Ok("fresh".into())], "wf-key");
        f.store.write_step(&f.company, 1, "overview").unwrap();
        f.store.write_proposal(&f.company, "  cached  ").unwrap();
        f.store
            .write_progress(&f.company, &ProposalProgress::idle(ProgressStatus::Processing));

        assert_eq!(f.builder.create(&f.company, false).await.unwrap(), "cached");
        assert!(f.client.inputs().is_empty());
        assert!(!f.store.progress_path(&f.company).exists());

        assert_eq!(f.builder.create(&f.company, true).await.unwrap(), "fresh");
        assert_eq!(f.store.read_proposal(&f.company).as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_failures_with_linear_delay() {
        let f = fixture(
            vec![
                Err(DifyError::RateLimited),
                Err(DifyError::Workflow("node failed".into())),
                Ok("third time".into()),
            ],
            "wf-key",
        );
        f.store.write_step(&f.company, 1, "overview").unwrap();

        let proposal = f.builder.create(&f.company, false).await.unwrap();

        assert_eq!(proposal, "third time");
        let calls = f.client.inputs.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].1.duration_since(calls[0].1), Duration::from_secs(5));
        assert_eq!(calls[2].1.duration_since(calls[1].1), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn failed_file_is_skipped() {
        let f = fixture(
            vec![
                Err(DifyError::Api {
                    status: 400,
                    message: "bad input".into(),
                }),
                Ok("moat proposal".into()),
            ],
            "wf-key",
        );
        f.store.write_step(&f.company, 1, "overview").unwrap();
        f.store.write_step(&f.company, 3, "moat").unwrap();

        assert_eq!(f.builder.create(&f.company, false).await.unwrap(), "moat proposal");
        assert_eq!(f.client.inputs().len(), 2);
    }

    #[tokio::test]
    async fn all_files_failing_records_error_progress() {
        let f = fixture(vec![Ok("   ".into())], "wf-key");
        f.store.write_step(&f.company, 2, "market").unwrap();

        let err = f.builder.create(&f.company, false).await.unwrap_err();

        assert!(matches!(err, BriefrunError::Upstream(DifyError::Workflow(_))));
        assert!(!f.store.has_proposal(&f.company));
        let progress = f.builder.progress(&f.company);
        assert_eq!(progress.status, ProgressStatus::Error);
        assert_eq!((progress.current, progress.total), (1, 1));
        assert!(progress.message.is_some());
    }

    #[tokio::test]
    async fn precondition_errors() {
        let f = fixture(vec![], "");
        let err = f.builder.create(&f.company, false).await.unwrap_err();
        assert!(matches!(err, BriefrunError::Config(_)));

        let f = fixture(vec![], "wf-key");
        let err = f.builder.create(&f.company, false).await.unwrap_err();
        assert!(matches!(err, BriefrunError::InvalidArgument(_)));

        let missing = CompanyKey::parse("globex").unwrap();
        let err = f.builder.create(&missing, false).await.unwrap_err();
        assert!(matches!(err, BriefrunError::NotFound(_)));
    }

    #[test]
    fn progress_reflects_disk_state() {
        let f = fixture(vec![], "wf-key");
        let missing = CompanyKey::parse("globex").unwrap();
        assert_eq!(f.builder.progress(&missing).status, ProgressStatus::NotStarted);
        assert_eq!(f.builder.progress(&f.company).status, ProgressStatus::NotStarted);

        let running = ProposalProgress {
            current: 2,
            total: 4,
            status: ProgressStatus::Processing,
            message: None,
        };
        f.store.write_progress(&f.company, &running);
        assert_eq!(f.builder.progress(&f.company), running);

        f.store.write_proposal(&f.company, "done").unwrap();
        assert_eq!(f.builder.progress(&f.company).status, ProgressStatus::Completed);
        assert!(!f.store.progress_path(&f.company).exists());
    }
}
