//! Run Coordinator: the control surface over jobs, results and proposals.
//!
//! The process runs at most one job at a time, for any company. The active
//! job lives in a single mutex-guarded slot; a supervising task waits on the
//! job's handle and clears the slot once the job it watches is over.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::company::CompanyKey;
use crate::config::BriefrunConfig;
use crate::dify::DifyApi;
use crate::error::{BriefrunError, Result};
use crate::markers::Terminal;
use crate::outputs::{OutputStore, ProposalProgress};
use crate::proposal::ProposalBuilder;
use crate::results::{CompanyResults, ResultsReader, StepProgress};
use crate::runner::{JobRunner, RunSettings};
use crate::state_machine::{JobRun, RunSummary};
use crate::steps::{RunPlan, StepCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Idle,
}

/// Answer to a run submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTicket {
    pub job_id: Option<Uuid>,
    pub company: String,
    pub status: JobStatus,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub status: JobStatus,
    pub company: Option<String>,
    pub job_id: Option<Uuid>,
    pub progress: Option<StepProgress>,
}

#[derive(Debug)]
struct ActiveJob {
    job_id: Uuid,
    company: CompanyKey,
    handle: AbortHandle,
}

impl ActiveJob {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

type Slot = Arc<Mutex<Option<ActiveJob>>>;

pub struct Coordinator<C> {
    runner: Arc<JobRunner<C>>,
    proposals: ProposalBuilder<C>,
    results: ResultsReader,
    store: OutputStore,
    catalog: StepCatalog,
    slot: Slot,
    idle: Arc<Notify>,
}

impl<C: DifyApi + 'static> Coordinator<C> {
    pub fn new(client: Arc<C>, config: &BriefrunConfig) -> Self {
        let store = OutputStore::new(&config.outputs_root);
        let catalog = StepCatalog::new(config.queries.clone());
        Self {
            runner: Arc::new(JobRunner::new(
                client.clone(),
                store.clone(),
                catalog.clone(),
                RunSettings::from_config(config),
            )),
            proposals: ProposalBuilder::new(client, store.clone(), catalog.clone(), config),
            results: ResultsReader::new(store.clone(), catalog.clone(), config.liveness()),
            store,
            catalog,
            slot: Arc::new(Mutex::new(None)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// Start a job for `company`, or report that there is nothing to run.
    ///
    /// `titles` selects steps by title; unknown titles are ignored and an
    /// empty match selects every step. A full selection resumes (only missing
    /// steps run); a partial one reruns exactly the selected steps.
    pub async fn submit_run(&self, company: &str, titles: Option<&[String]>) -> Result<RunTicket> {
        let company = CompanyKey::parse(company)?;
        let selection = self.catalog.select(titles);

        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.as_ref()
            && active.is_alive()
        {
            return Err(BriefrunError::Conflict(format!(
                "a job for '{}' is already running",
                active.company
            )));
        }

        // Another process may own this company's job; its markers are the
        // only trace of it here.
        if self.results.disk_running(&company) {
            return Err(BriefrunError::Conflict(format!(
                "a job for '{company}' is running in another process"
            )));
        }

        // The slot stays locked through directory creation and planning so
        // no other submit can interleave. The fs calls only stat a handful of
        // small files.
        self.store.ensure_company_dir(&company)?;

        let indices = match self
            .catalog
            .plan(&selection, |i| self.store.has_step_output(&company, i))
        {
            RunPlan::AlreadyComplete => {
                info!(%company, "all requested steps already have output");
                return Ok(RunTicket {
                    job_id: None,
                    company: company.to_string(),
                    status: JobStatus::Completed,
                });
            }
            RunPlan::Run(indices) => indices,
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BriefrunError::Internal(format!("no runtime to start the job on: {e}")))?;

        let job_id = Uuid::new_v4();
        let run = JobRun::new(job_id, company.clone(), indices);
        let runner = self.runner.clone();
        let span = info_span!("job", %company, %job_id);
        let handle = runtime.spawn(async move { runner.run(run).await }.instrument(span));

        *slot = Some(ActiveJob {
            job_id,
            company: company.clone(),
            handle: handle.abort_handle(),
        });
        drop(slot);

        runtime.spawn(supervise(self.slot.clone(), self.idle.clone(), job_id, handle));
        info!(%company, %job_id, "job accepted");

        Ok(RunTicket {
            job_id: Some(job_id),
            company: company.to_string(),
            status: JobStatus::Running,
        })
    }

    /// Status of the active job, or of `company` when given. A company counts
    /// as running when this process runs its job or its disk markers are live.
    pub async fn get_status(&self, company: Option<&str>) -> Result<RunStatus> {
        let company = company.map(CompanyKey::parse).transpose()?;
        let (active_company, active_id) = {
            let slot = self.slot.lock().await;
            match slot.as_ref().filter(|a| a.is_alive()) {
                Some(active) => (Some(active.company.clone()), Some(active.job_id)),
                None => (None, None),
            }
        };

        let Some(company) = company else {
            return Ok(RunStatus {
                status: if active_id.is_some() {
                    JobStatus::Running
                } else {
                    JobStatus::Idle
                },
                progress: active_company.as_ref().map(|c| self.results.progress(c)),
                company: active_company.map(|c| c.to_string()),
                job_id: active_id,
            });
        };

        let memory = active_company.as_ref() == Some(&company);
        let running = memory || self.results.disk_running(&company);
        Ok(RunStatus {
            status: if running {
                JobStatus::Running
            } else {
                JobStatus::Idle
            },
            company: Some(company.to_string()),
            job_id: if memory { active_id } else { None },
            progress: Some(self.results.progress(&company)),
        })
    }

    pub async fn results(&self, company: &str) -> Result<CompanyResults> {
        let company = CompanyKey::parse(company)?;
        let memory = self.memory_running(&company).await;
        Ok(self.results.read(&company, memory))
    }

    /// The terminal marker left by the company's last job, if any.
    pub fn last_terminal(&self, company: &str) -> Result<Option<Terminal>> {
        let company = CompanyKey::parse(company)?;
        Ok(self.store.markers(&company).snapshot().terminal())
    }

    pub fn list_companies(&self) -> Result<Vec<String>> {
        self.store.list_companies()
    }

    /// Delete every artifact of `company`. Refused while its job is live.
    /// Returns whether a directory was removed.
    pub async fn delete_results(&self, company: &str) -> Result<bool> {
        let company = CompanyKey::parse(company)?;
        // Held across the delete so no job can start for it meanwhile.
        let slot = self.slot.lock().await;
        let memory = slot
            .as_ref()
            .is_some_and(|a| a.is_alive() && a.company == company);
        if memory || self.results.disk_running(&company) {
            return Err(BriefrunError::Conflict(format!(
                "a job for '{company}' is running"
            )));
        }
        let removed = self.store.delete_company(&company)?;
        drop(slot);
        info!(%company, removed, "results deleted");
        Ok(removed)
    }

    pub async fn create_proposal(&self, company: &str, force: bool) -> Result<String> {
        let company = CompanyKey::parse(company)?;
        self.proposals.create(&company, force).await
    }

    pub fn proposal_progress(&self, company: &str) -> Result<ProposalProgress> {
        let company = CompanyKey::parse(company)?;
        Ok(self.proposals.progress(&company))
    }

    /// Resolve once no job is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.slot_alive().await {
                return;
            }
            notified.await;
        }
    }

    async fn slot_alive(&self) -> bool {
        self.slot.lock().await.as_ref().is_some_and(ActiveJob::is_alive)
    }

    async fn memory_running(&self, company: &CompanyKey) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.is_alive() && &a.company == company)
    }
}

/// Wait for the job to end, then clear the slot if it still belongs to it.
async fn supervise(slot: Slot, idle: Arc<Notify>, job_id: Uuid, handle: JoinHandle<RunSummary>) {
    match handle.await {
        Ok(summary) => info!(%job_id, terminal = ?summary.terminal, "job task ended"),
        Err(e) if e.is_panic() => error!(%job_id, "job task panicked"),
        Err(e) => warn!(%job_id, error = %e, "job task was cancelled"),
    }

    let mut slot = slot.lock().await;
    if slot.as_ref().is_some_and(|a| a.job_id == job_id) {
        *slot = None;
    }
    drop(slot);
    idle.notify_waiters();
}
