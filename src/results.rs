//! Results Reader: job status and step contents rebuilt from disk.

use std::time::SystemTime;

use serde::Serialize;

use crate::company::CompanyKey;
use crate::liveness::{Liveness, LivenessThresholds};
use crate::outputs::OutputStore;
use crate::steps::StepCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsStatus {
    Running,
    Completed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StepProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultItem {
    pub index: usize,
    pub title: String,
    pub text: String,
    pub markdown: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyResults {
    pub company: String,
    pub status: ResultsStatus,
    pub queries: Vec<String>,
    pub progress: StepProgress,
    pub items: Vec<ResultItem>,
    pub has_proposal: bool,
}

#[derive(Debug, Clone)]
pub struct ResultsReader {
    store: OutputStore,
    catalog: StepCatalog,
    thresholds: LivenessThresholds,
}

impl ResultsReader {
    pub fn new(store: OutputStore, catalog: StepCatalog, thresholds: LivenessThresholds) -> Self {
        Self {
            store,
            catalog,
            thresholds,
        }
    }

    /// Read every step of `company`. `memory_running` is the in-process half of
    /// the liveness decision; the disk half is evaluated here.
    pub fn read(&self, company: &CompanyKey, memory_running: bool) -> CompanyResults {
        let items: Vec<ResultItem> = self
            .catalog
            .indices()
            .map(|index| {
                let artifact = self.store.read_step(company, index);
                ResultItem {
                    index,
                    title: self.catalog.title(index).unwrap_or_default().to_string(),
                    text: artifact.text,
                    markdown: artifact.markdown,
                }
            })
            .collect();
        let completed = items
            .iter()
            .filter(|item| !item.text.is_empty() || !item.markdown.is_empty())
            .count();

        let snapshot = self.store.markers(company).snapshot();
        let liveness = Liveness::evaluate(memory_running, &snapshot, SystemTime::now(), self.thresholds);
        let status = if liveness.is_running() {
            ResultsStatus::Running
        } else if completed > 0 || snapshot.done.is_some() {
            ResultsStatus::Completed
        } else {
            ResultsStatus::NotFound
        };

        CompanyResults {
            company: company.to_string(),
            status,
            queries: self.catalog.titles().to_vec(),
            progress: StepProgress {
                completed,
                total: self.catalog.len(),
            },
            items,
            has_proposal: self.store.has_proposal(company),
        }
    }

    pub fn progress(&self, company: &CompanyKey) -> StepProgress {
        StepProgress {
            completed: self
                .catalog
                .indices()
                .filter(|&i| self.store.read_step(company, i).is_completed())
                .count(),
            total: self.catalog.len(),
        }
    }

    /// Whether the disk markers alone say a job is live.
    pub fn disk_running(&self, company: &CompanyKey) -> bool {
        let snapshot = self.store.markers(company).snapshot();
        Liveness::evaluate(false, &snapshot, SystemTime::now(), self.thresholds).disk
    }
}
