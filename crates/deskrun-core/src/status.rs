//! Status enums for Sessions and Action runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of one sandbox session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Session created but not yet provisioned.
    #[default]
    NotStarted,
    /// Sandbox provisioned and holding its ports.
    Running,
    /// Sandbox torn down. Terminal.
    Stopped,
}

/// State of one action run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    /// Engine is making progress.
    #[default]
    Running,
    /// Suspended waiting for a reply from the input handler.
    NeedsInput,
    /// Suspended waiting for the safety-check handler to gate an operation.
    NeedsSafetyCheck,
    /// Finished successfully.
    Complete,
    /// Engine reported a failure.
    Error,
    /// Engine reported a status outside the recognized set.
    Unknown,
    /// A handler declined to continue.
    Aborted,
}

impl ActionState {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Error | Self::Unknown | Self::Aborted
        )
    }

    /// Returns true if the run is suspended on a handler.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::NeedsInput | Self::NeedsSafetyCheck)
    }

    /// Returns true only for the successful terminal state.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::NeedsInput => "NEEDS_INPUT",
            Self::NeedsSafetyCheck => "NEEDS_SAFETY_CHECK",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ActionState::Running.is_terminal());
        assert!(!ActionState::NeedsInput.is_terminal());
        assert!(!ActionState::NeedsSafetyCheck.is_terminal());
        assert!(ActionState::Complete.is_terminal());
        assert!(ActionState::Error.is_terminal());
        assert!(ActionState::Unknown.is_terminal());
        assert!(ActionState::Aborted.is_terminal());
    }

    #[test]
    fn test_only_complete_is_success() {
        assert!(ActionState::Complete.is_success());
        assert!(!ActionState::Unknown.is_success());
        assert!(!ActionState::Aborted.is_success());
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(ActionState::NeedsSafetyCheck.to_string(), "NEEDS_SAFETY_CHECK");
        assert_eq!(SessionStatus::default(), SessionStatus::NotStarted);
    }
}
