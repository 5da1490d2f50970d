//! Reduction of task outcomes into a summary.

use crate::{TaskId, TaskOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lowest numeric result seen so far and the task that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestValue {
    pub task_id: TaskId,
    pub label: String,
    pub value: f64,
}

/// Outcome counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Returns true if at least one task ran and none succeeded.
    pub fn is_total_failure(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }

    /// Returns true if some but not all tasks failed.
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 && self.succeeded > 0
    }
}

/// Every outcome of a run indexed by task, plus the best numeric value.
///
/// Outcomes are recorded in completion order. Only `Numeric` successes take
/// part in the reduction; text outputs and failures are kept in the mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    outcomes: HashMap<TaskId, TaskOutcome>,
    best: Option<BestValue>,
}

impl AggregateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome. A second outcome for the same task replaces the first.
    pub fn record(&mut self, outcome: TaskOutcome) {
        if let Some(value) = outcome.output().and_then(|o| o.as_number()) {
            let improves = self.best.as_ref().map_or(true, |best| value < best.value);
            if improves {
                self.best = Some(BestValue {
                    task_id: outcome.task_id.clone(),
                    label: outcome.label.clone(),
                    value,
                });
            }
        }
        self.outcomes.insert(outcome.task_id.clone(), outcome);
    }

    /// Lowest numeric result, or `None` if no task produced one.
    pub fn best(&self) -> Option<&BestValue> {
        self.best.as_ref()
    }

    /// Outcome for one task.
    pub fn get(&self, task_id: &TaskId) -> Option<&TaskOutcome> {
        self.outcomes.get(task_id)
    }

    /// All outcomes, ordered by task index.
    pub fn outcomes(&self) -> Vec<&TaskOutcome> {
        let mut outcomes: Vec<_> = self.outcomes.values().collect();
        outcomes.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.task_id.cmp(&b.task_id)));
        outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Counts of successes and failures.
    pub fn summary(&self) -> RunSummary {
        let succeeded = self.succeeded();
        RunSummary {
            total: self.outcomes.len(),
            succeeded,
            failed: self.outcomes.len() - succeeded,
        }
    }
}

impl Extend<TaskOutcome> for AggregateResult {
    fn extend<I: IntoIterator<Item = TaskOutcome>>(&mut self, iter: I) {
        for outcome in iter {
            self.record(outcome);
        }
    }
}

impl FromIterator<TaskOutcome> for AggregateResult {
    fn from_iter<I: IntoIterator<Item = TaskOutcome>>(iter: I) -> Self {
        let mut aggregate = Self::new();
        aggregate.extend(iter);
        aggregate
    }
}
