//! Core domain errors.

use thiserror::Error;

/// Core domain errors for DeskRun.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Task index outside the allocatable range.
    #[error("Invalid task index {index}: {reason}")]
    InvalidIndex { index: u32, reason: String },

    /// Two port kinds would hand out the same port.
    #[error("Port ranges overlap: {first} and {second}")]
    PortRangeOverlap { first: String, second: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
