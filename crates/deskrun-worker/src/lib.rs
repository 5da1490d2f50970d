//! DeskRun worker pool
//!
//! Runs batches of [`TaskDescriptor`](deskrun_core::TaskDescriptor)s, each in
//! its own desktop session, with at most `max_workers` sessions alive at
//! once. Every descriptor yields exactly one outcome, whatever happens
//! inside its unit of work.

pub mod config;
pub mod error;
pub mod executor;
pub mod pool;
pub mod session;

pub use config::{ConflictPolicy, PoolConfig};
pub use error::{PoolError, SessionError};
pub use executor::TaskExecutor;
pub use pool::{OutcomeStream, WorkerPool};
pub use session::{PoolStats, PortRegistry, PortReservation, Session, SessionManager};
