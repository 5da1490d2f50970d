//! End-of-run report and exit policy.

use std::fmt::Write;

use clap::ValueEnum;
use deskrun_core::{AggregateResult, BestValue, RunSummary, TaskOutcome};
use deskrun_worker::PoolStats;
use serde::Serialize;

/// When the process should exit non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FailOn {
    /// Always exit 0.
    Never,
    /// Exit 2 when every task failed.
    #[default]
    Total,
    /// Exit 1 when any task failed.
    Any,
}

impl FailOn {
    pub fn exit_code(self, summary: &RunSummary) -> i32 {
        match self {
            Self::Never => 0,
            Self::Total if summary.is_total_failure() => 2,
            Self::Any if summary.failed > 0 => 1,
            Self::Total | Self::Any => 0,
        }
    }
}

/// Machine-readable report printed with `--json`.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub summary: RunSummary,
    pub best: Option<&'a BestValue>,
    pub outcomes: Vec<&'a TaskOutcome>,
    pub stats: PoolStats,
}

impl<'a> Report<'a> {
    pub fn new(aggregate: &'a AggregateResult, stats: PoolStats) -> Self {
        Self {
            summary: aggregate.summary(),
            best: aggregate.best(),
            outcomes: aggregate.outcomes(),
            stats,
        }
    }
}

fn result_cell(outcome: &TaskOutcome, prefix: &str) -> String {
    match &outcome.result {
        Ok(output) if output.as_number().is_some() => format!("{}{}", prefix, output),
        Ok(output) => output.to_string(),
        Err(failure) => failure.to_string(),
    }
}

/// Per-task table ordered by task index.
pub fn render_table(aggregate: &AggregateResult, heading: &str, prefix: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n----- {} -----", heading);
    let _ = writeln!(out, "{:<16}  {:<10}  {:>8}  {}", "TASK", "STATE", "TIME", "RESULT");
    let _ = writeln!(out, "{}", "-".repeat(72));

    for outcome in aggregate.outcomes() {
        let state = outcome
            .final_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let time = format!("{:.1}s", outcome.duration_ms() as f64 / 1000.0);
        let _ = writeln!(
            out,
            "{:<16}  {:<10}  {:>8}  {}",
            outcome.label,
            state,
            time,
            result_cell(outcome, prefix)
        );
    }
    out
}

/// One line naming the lowest numeric result.
pub fn render_best(best: Option<&BestValue>, what: &str, prefix: &str) -> String {
    match best {
        Some(best) => format!("{}: {} at {}{}", what, best.label, prefix, best.value),
        None => format!("{}: no valid result", what),
    }
}
