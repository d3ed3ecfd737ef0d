//! The ordered query list and run-set planning.

use std::collections::BTreeSet;

/// Ordered step titles. Step indices are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCatalog {
    titles: Vec<String>,
}

/// Which steps a caller asked for, after mapping titles to indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSelection {
    pub indices: Vec<usize>,
    /// True when every step is selected. Full selections resume; partial
    /// selections overwrite.
    pub full: bool,
}

/// What a run request resolves to once existing outputs are considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPlan {
    /// Nothing to do.
    AlreadyComplete,
    /// Run exactly these indices, in order.
    Run(Vec<usize>),
}

impl StepCatalog {
    pub fn new(titles: Vec<String>) -> Self {
        Self { titles }
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    /// Title for a 1-based index.
    pub fn title(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.titles.get(i))
            .map(String::as_str)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + use<> {
        1..=self.titles.len()
    }

    /// Map requested titles to indices. Unknown titles are ignored; if nothing
    /// matches (or nothing was requested) every step is selected.
    pub fn select(&self, requested: Option<&[String]>) -> StepSelection {
        let wanted: BTreeSet<&str> = requested
            .unwrap_or_default()
            .iter()
            .map(|t| t.trim())
            .collect();

        let mut indices: Vec<usize> = self
            .titles
            .iter()
            .enumerate()
            .filter(|(_, title)| wanted.contains(title.as_str()))
            .map(|(i, _)| i + 1)
            .collect();

        if indices.is_empty() {
            indices = self.indices().collect();
        }

        let full = indices.len() == self.titles.len();
        StepSelection { indices, full }
    }

    /// Resolve a selection against the set of indices that already have output.
    ///
    /// When every step already has output the plan is `AlreadyComplete`
    /// whatever was selected. Otherwise a full selection runs only the missing
    /// indices and a partial one runs exactly what was asked for.
    pub fn plan(&self, selection: &StepSelection, has_output: impl Fn(usize) -> bool) -> RunPlan {
        if self.indices().all(&has_output) {
            return RunPlan::AlreadyComplete;
        }

        let run: Vec<usize> = if selection.full {
            selection
                .indices
                .iter()
                .copied()
                .filter(|&i| !has_output(i))
                .collect()
        } else {
            selection.indices.clone()
        };

        if run.is_empty() {
            RunPlan::AlreadyComplete
        } else {
            RunPlan::Run(run)
        }
    }
}
