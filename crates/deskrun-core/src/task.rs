//! Task descriptors and outcomes.

use crate::{ActionOutput, ActionState, CoreError, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Immutable input to one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task identifier.
    pub id: TaskId,

    /// 1-based slot, used to derive the task's ports.
    pub index: u32,

    /// Human-readable label for logs and summaries.
    pub label: String,

    /// Instructions handed to the engine.
    pub prompt: String,

    /// Task-specific parameters (origin, destination, weekend, ...).
    pub params: BTreeMap<String, String>,
}

impl TaskDescriptor {
    /// Create a new descriptor. The id defaults to `task-{index}`.
    pub fn new(index: u32, label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::for_index(index),
            index,
            label: label.into(),
            prompt: prompt.into(),
            params: BTreeMap::new(),
        }
    }

    /// Builder method to set a specific ID.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Get a parameter by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Check the descriptor can be handed to an engine.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.index == 0 {
            return Err(CoreError::InvalidInput(format!(
                "task {} has index 0; indices are 1-based",
                self.id
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "task {} has no instructions",
                self.id
            )));
        }
        Ok(())
    }
}

/// Why a unit of work failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The sandbox could not be provisioned.
    StartFailure,
    /// A port of the assignment is held by another live session.
    ResourceConflict,
    /// Engine fault or panic inside the unit of work.
    ExecutionFault,
    /// The engine reported `ERROR`.
    AutomationError,
    /// The engine reported a status outside the recognized set.
    UnrecognizedStatus,
    /// A handler declined to continue.
    Aborted,
    /// The descriptor failed validation.
    InvalidTask,
    /// The run exceeded the worker timeout.
    TimedOut,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StartFailure => "START_FAILURE",
            Self::ResourceConflict => "RESOURCE_CONFLICT",
            Self::ExecutionFault => "EXECUTION_FAULT",
            Self::AutomationError => "AUTOMATION_ERROR",
            Self::UnrecognizedStatus => "UNRECOGNIZED_STATUS",
            Self::Aborted => "ABORTED",
            Self::InvalidTask => "INVALID_TASK",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Failure detail carried by an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Final result of one scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task this outcome belongs to.
    pub task_id: TaskId,

    /// Slot of the task.
    pub index: u32,

    /// Label copied from the descriptor.
    pub label: String,

    /// Parameters copied from the descriptor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    /// Name of the session the task ran in.
    pub session: String,

    /// Terminal state reached by the action run, if any.
    pub final_state: Option<ActionState>,

    /// Output on success, failure detail otherwise.
    pub result: Result<ActionOutput, TaskFailure>,

    /// When the worker picked the task up.
    pub started_at: DateTime<Utc>,

    /// When the outcome was produced.
    pub finished_at: DateTime<Utc>,
}

impl TaskOutcome {
    /// Returns true for a successful outcome.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The output of a successful outcome.
    pub fn output(&self) -> Option<&ActionOutput> {
        self.result.as_ref().ok()
    }

    /// The failure of a failed outcome.
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.result.as_ref().err()
    }

    /// Wall-clock time spent on the task, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
