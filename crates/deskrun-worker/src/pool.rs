//! Bounded worker pool.
//!
//! [`WorkerPool::run`] spawns `min(max_workers, tasks)` worker loops that
//! pull descriptors from a shared queue. Each descriptor becomes exactly one
//! [`TaskOutcome`] on the returned stream, in completion order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use deskrun_agent::{ActionDriver, ActionMode, DesktopEngine};
use deskrun_core::{AggregateResult, TaskDescriptor, TaskOutcome};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{ConflictPolicy, PoolConfig};
use crate::error::PoolError;
use crate::executor::{finish, join_fault, TaskExecutor};
use crate::session::{PoolStats, SessionManager};

/// Stream of outcomes in completion order.
pub type OutcomeStream = ReceiverStream<TaskOutcome>;

type TaskQueue = Arc<Mutex<VecDeque<TaskDescriptor>>>;

/// Runs task batches with bounded parallelism.
pub struct WorkerPool {
    engine: Arc<dyn DesktopEngine>,
    config: Arc<PoolConfig>,
    sessions: Arc<SessionManager>,
}

impl WorkerPool {
    pub fn new(engine: Arc<dyn DesktopEngine>, config: PoolConfig) -> Self {
        // Provision and teardown share the per-task limit
        let sessions = Arc::new(
            SessionManager::new(engine.clone(), config.port_bases, config.conflict_policy)
                .with_lifecycle_timeout(config.task_timeout),
        );
        Self {
            engine,
            config: Arc::new(config),
            sessions,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Session counters across every run of this pool.
    pub fn stats(&self) -> PoolStats {
        self.sessions.stats()
    }

    /// Start running `tasks` and return their outcomes as they complete.
    ///
    /// Must be called from within a Tokio runtime. Contract violations are
    /// reported before any worker starts; zero tasks yields an empty stream.
    pub fn run(
        &self,
        tasks: Vec<TaskDescriptor>,
        mode: ActionMode,
    ) -> Result<OutcomeStream, PoolError> {
        self.check(&tasks)?;

        let workers = self.config.max_workers.min(tasks.len());
        let (tx, rx) = mpsc::channel(tasks.len().max(1));

        info!(
            tasks = tasks.len(),
            workers,
            mode = ?mode,
            "Starting worker pool"
        );

        let executor = Arc::new(TaskExecutor::new(
            self.sessions.clone(),
            ActionDriver::new(self.engine.clone(), mode),
            self.config.clone(),
        ));
        let queue: TaskQueue = Arc::new(Mutex::new(tasks.into()));

        for worker in 0..workers {
            tokio::spawn(worker_loop(
                worker,
                queue.clone(),
                executor.clone(),
                tx.clone(),
            ));
        }

        Ok(ReceiverStream::new(rx))
    }

    /// Run `tasks` and reduce every outcome.
    pub async fn run_to_completion(
        &self,
        tasks: Vec<TaskDescriptor>,
        mode: ActionMode,
    ) -> Result<AggregateResult, PoolError> {
        let mut outcomes = self.run(tasks, mode)?;
        let mut aggregate = AggregateResult::new();
        while let Some(outcome) = outcomes.next().await {
            aggregate.record(outcome);
        }

        let stats = self.stats();
        info!(
            outcomes = aggregate.len(),
            succeeded = aggregate.succeeded(),
            peak_live = stats.peak_live,
            "Worker pool finished"
        );
        Ok(aggregate)
    }

    fn check(&self, tasks: &[TaskDescriptor]) -> Result<(), PoolError> {
        if tasks.is_empty() {
            return Ok(());
        }
        if self.config.max_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut ids = HashSet::new();
        let mut indices = HashMap::new();
        for task in tasks {
            if !ids.insert(&task.id) {
                return Err(PoolError::DuplicateTaskId(task.id.clone()));
            }
            if let Some(first) = indices.insert(task.index, &task.id) {
                return Err(PoolError::DuplicateIndex {
                    index: task.index,
                    first: first.clone(),
                    second: task.id.clone(),
                });
            }
        }

        let max_index = tasks.iter().map(|t| t.index).max().unwrap_or(0);
        let headroom = match self.config.conflict_policy {
            ConflictPolicy::Fail => 0,
            ConflictPolicy::NextFree { max_attempts } => max_attempts,
        };
        self.config
            .port_bases
            .validate(max_index.saturating_add(headroom))?;

        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    queue: TaskQueue,
    executor: Arc<TaskExecutor>,
    tx: mpsc::Sender<TaskOutcome>,
) {
    debug!(worker, "Worker started");

    loop {
        let Some(task) = queue.lock().await.pop_front() else {
            break;
        };

        let started_at = Utc::now();
        let fallback = task.clone();
        let unit = executor.clone();

        // A panic outside the drive (provision, teardown) still yields an outcome
        let outcome = match tokio::spawn(async move { unit.execute(task).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(worker, task = %fallback.id, error = %e, "Unit of work crashed");
                let session = executor.session_name(fallback.index);
                finish(&fallback, session, started_at, None, Err(join_fault(e)))
            }
        };

        if tx.send(outcome).await.is_err() {
            warn!(worker, "Outcome receiver dropped");
        }
    }

    debug!(worker, "Worker finished");
}
