//! On-disk layout for a company's artifacts.
//!
//! ```text
//! {root}/{company}/{company}_{i}.txt       step output, i in 1..=N
//! {root}/{company}/{company}_{i}.md        same content
//! {root}/{company}/{company}_proposal.txt
//! {root}/{company}/{company}_proposal.md
//! {root}/{company}/{company}_proposal_progress.json
//! {root}/{company}/.running .heartbeat .done .aborted
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::company::CompanyKey;
use crate::error::{BriefrunError, Result};
use crate::markers::MarkerSet;

/// Status of an in-flight proposal aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    Processing,
    Completed,
    Error,
}

/// Transient progress record written while a proposal is being built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalProgress {
    pub current: usize,
    pub total: usize,
    #[serde(default = "default_progress_status")]
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn default_progress_status() -> ProgressStatus {
    ProgressStatus::Processing
}

impl ProposalProgress {
    pub fn idle(status: ProgressStatus) -> Self {
        Self {
            current: 0,
            total: 0,
            status,
            message: None,
        }
    }
}

/// Text of one step as found on disk. Missing or unreadable files read as "".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepArtifact {
    pub text: String,
    pub markdown: String,
}

impl StepArtifact {
    pub fn is_completed(&self) -> bool {
        !self.text.is_empty() || !self.markdown.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn company_dir(&self, company: &CompanyKey) -> PathBuf {
        self.root.join(company.as_str())
    }

    pub fn markers(&self, company: &CompanyKey) -> MarkerSet {
        MarkerSet::new(self.company_dir(company))
    }

    /// Create the company directory and any missing parents.
    pub fn ensure_company_dir(&self, company: &CompanyKey) -> Result<PathBuf> {
        let dir = self.company_dir(company);
        fs::create_dir_all(&dir)
            .map_err(|e| BriefrunError::storage(format!("create {}", dir.display()), e))?;
        Ok(dir)
    }

    pub fn step_paths(&self, company: &CompanyKey, index: usize) -> (PathBuf, PathBuf) {
        let dir = self.company_dir(company);
        let base = format!("{company}_{index}");
        (dir.join(format!("{base}.txt")), dir.join(format!("{base}.md")))
    }

    /// Whether either file exists for the step. Existence is what counts, even
    /// when the file is empty.
    pub fn has_step_output(&self, company: &CompanyKey, index: usize) -> bool {
        let (txt, md) = self.step_paths(company, index);
        txt.exists() || md.exists()
    }

    /// Write both step files, overwriting.
    pub fn write_step(&self, company: &CompanyKey, index: usize, text: &str) -> Result<()> {
        let (txt, md) = self.step_paths(company, index);
        for path in [&txt, &md] {
            fs::write(path, text)
                .map_err(|e| BriefrunError::storage(format!("write {}", path.display()), e))?;
        }
        Ok(())
    }

    pub fn read_step(&self, company: &CompanyKey, index: usize) -> StepArtifact {
        let (txt, md) = self.step_paths(company, index);
        StepArtifact {
            text: read_lenient(&txt),
            markdown: read_lenient(&md),
        }
    }

    pub fn proposal_paths(&self, company: &CompanyKey) -> (PathBuf, PathBuf) {
        let dir = self.company_dir(company);
        (
            dir.join(format!("{company}_proposal.txt")),
            dir.join(format!("{company}_proposal.md")),
        )
    }

    pub fn has_proposal(&self, company: &CompanyKey) -> bool {
        let (txt, _) = self.proposal_paths(company);
        fs::metadata(txt).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// The cached proposal text, trimmed, if one exists and is non-blank.
    pub fn read_proposal(&self, company: &CompanyKey) -> Option<String> {
        let (txt, _) = self.proposal_paths(company);
        let text = read_lenient(&txt);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Persist the proposal. The `.txt` file is authoritative; a failed `.md`
    /// write is only logged.
    pub fn write_proposal(&self, company: &CompanyKey, text: &str) -> Result<()> {
        let (txt, md) = self.proposal_paths(company);
        fs::write(&txt, text)
            .map_err(|e| BriefrunError::storage(format!("write {}", txt.display()), e))?;
        if let Err(e) = fs::write(&md, text) {
            warn!(company = %company, path = %md.display(), error = %e, "failed to write markdown proposal");
        }
        Ok(())
    }

    pub fn progress_path(&self, company: &CompanyKey) -> PathBuf {
        self.company_dir(company)
            .join(format!("{company}_proposal_progress.json"))
    }

    /// Best-effort write of the progress record.
    pub fn write_progress(&self, company: &CompanyKey, progress: &ProposalProgress) {
        let path = self.progress_path(company);
        let written = serde_json::to_vec(progress)
            .map_err(std::io::Error::other)
            .and_then(|bytes| fs::write(&path, bytes));
        if let Err(e) = written {
            warn!(company = %company, path = %path.display(), error = %e, "failed to write proposal progress");
        }
    }

    /// The progress record, if present and parseable.
    pub fn read_progress(&self, company: &CompanyKey) -> Option<ProposalProgress> {
        let path = self.progress_path(company);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(company = %company, path = %path.display(), error = %e, "failed to read proposal progress");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(progress) => Some(progress),
            Err(e) => {
                warn!(company = %company, path = %path.display(), error = %e, "invalid proposal progress record");
                None
            }
        }
    }

    pub fn clear_progress(&self, company: &CompanyKey) {
        remove_if_present(&self.progress_path(company));
    }

    /// Names of every company directory under the root.
    pub fn list_companies(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BriefrunError::storage(
                    format!("list {}", self.root.display()),
                    e,
                ));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove the company directory. Returns whether anything was removed.
    pub fn delete_company(&self, company: &CompanyKey) -> Result<bool> {
        let dir = self.company_dir(company);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BriefrunError::storage(format!("delete {}", dir.display()), e)),
        }
    }
}

fn read_lenient(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}
