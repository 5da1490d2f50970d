//! Worker pool errors.

use deskrun_core::{CoreError, ErrorKind, TaskFailure, TaskId};
use thiserror::Error;

/// Errors raised while starting a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine could not provision the desktop.
    #[error("Failed to start session '{name}': {reason}")]
    StartFailure { name: String, reason: String },

    /// A port of the assignment is held by another live session.
    #[error("Port {port} for session '{name}' is held by '{holder}'")]
    ResourceConflict {
        name: String,
        port: u16,
        holder: String,
    },

    /// The assignment could not be computed.
    #[error("Cannot allocate ports for session '{name}': {source}")]
    Allocation {
        name: String,
        #[source]
        source: CoreError,
    },

    /// `start` was called on a session that is not fresh.
    #[error("Session '{0}' was already started")]
    AlreadyStarted(String),
}

impl SessionError {
    /// The outcome failure this error maps to.
    pub fn to_failure(&self) -> TaskFailure {
        let kind = match self {
            Self::StartFailure { .. } | Self::AlreadyStarted(_) => ErrorKind::StartFailure,
            Self::ResourceConflict { .. } | Self::Allocation { .. } => ErrorKind::ResourceConflict,
        };
        TaskFailure::new(kind, self.to_string())
    }
}

/// Contract violations rejected before any worker starts.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Two descriptors share an id.
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    /// Two descriptors share a slot index.
    #[error("Duplicate task index {index} (tasks {first} and {second})")]
    DuplicateIndex {
        index: u32,
        first: TaskId,
        second: TaskId,
    },

    /// The port bases cannot serve every task.
    #[error("Invalid port layout: {0}")]
    PortLayout(#[from] CoreError),

    /// Tasks were submitted to a pool allowed zero workers.
    #[error("Pool configured with zero workers")]
    NoWorkers,
}
