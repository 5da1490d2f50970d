//! DeskRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Any automation engine or sandbox backend
//!
//! It holds the task/outcome model, the port allocator and the result
//! aggregator shared by the agent, worker and CLI crates.

pub mod aggregate;
pub mod error;
pub mod ids;
pub mod output;
pub mod ports;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use aggregate::{AggregateResult, BestValue, RunSummary};
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use output::ActionOutput;
pub use ports::{PortBases, PortKind, ResourceAssignment};
pub use status::{ActionState, SessionStatus};
pub use task::{ErrorKind, TaskDescriptor, TaskFailure, TaskOutcome};
