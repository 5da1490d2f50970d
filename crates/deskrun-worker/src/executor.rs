//! One unit of work: allocate, start, drive, stop, report.
//!
//! Everything that can go wrong inside a unit of work ends up in the
//! returned [`TaskOutcome`]; nothing escapes as an error or a panic. The
//! session is stopped on every path that started it, before the outcome
//! is built.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deskrun_agent::{ActionDriver, ActionRun, EngineError};
use deskrun_core::{
    ActionOutput, ActionState, ErrorKind, TaskDescriptor, TaskFailure, TaskOutcome,
};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::session::{Session, SessionManager};

type RunResult = (Option<ActionState>, Result<ActionOutput, TaskFailure>);

/// Executes descriptors against a shared session manager.
#[derive(Clone)]
pub struct TaskExecutor {
    sessions: Arc<SessionManager>,
    driver: ActionDriver,
    config: Arc<PoolConfig>,
}

impl TaskExecutor {
    pub fn new(
        sessions: Arc<SessionManager>,
        driver: ActionDriver,
        config: Arc<PoolConfig>,
    ) -> Self {
        Self {
            sessions,
            driver,
            config,
        }
    }

    pub fn session_name(&self, index: u32) -> String {
        self.config.session_name(index)
    }

    /// Run one task to an outcome.
    pub async fn execute(&self, task: TaskDescriptor) -> TaskOutcome {
        let started_at = Utc::now();
        let name = self.config.session_name(task.index);
        info!(task = %task.id, index = task.index, session = %name, "Executing task");

        let assignment = match self.config.port_bases.allocate(task.index) {
            Ok(assignment) => assignment,
            Err(e) => {
                let failure = TaskFailure::new(ErrorKind::InvalidTask, e.to_string());
                return finish(&task, name, started_at, None, Err(failure));
            }
        };

        let mut session =
            Session::new(name, task.index, assignment).with_params(task.params.clone());
        if let Err(e) = self.sessions.start(&mut session).await {
            warn!(task = %task.id, error = %e, "Session did not start");
            let name = session.name().to_string();
            return finish(&task, name, started_at, None, Err(e.to_failure()));
        }

        let (final_state, result) = self.run_in_session(&session, &task).await;
        self.sessions.stop(&mut session).await;

        let name = session.name().to_string();
        finish(&task, name, started_at, final_state, result)
    }

    async fn run_in_session(&self, session: &Session, task: &TaskDescriptor) -> RunResult {
        if let Err(e) = task.validate() {
            info!(task = %task.id, error = %e, "Invalid task parameters");
            return (None, Err(TaskFailure::new(ErrorKind::InvalidTask, e.to_string())));
        }

        let Some(handle) = session.handle().cloned() else {
            return (
                None,
                Err(TaskFailure::new(
                    ErrorKind::ExecutionFault,
                    "running session has no engine handle",
                )),
            );
        };

        let driver = self.driver.clone();
        let prompt = task.prompt.clone();
        let mut drive = tokio::spawn(async move { driver.drive(&handle, &prompt).await });

        let joined = match self.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut drive).await {
                Ok(joined) => joined,
                Err(_) => {
                    drive.abort();
                    // Wait for the abort so no step races the teardown
                    let _ = drive.await;
                    warn!(task = %task.id, timeout_secs = limit.as_secs_f64(), "Task timed out");
                    return (None, Err(timed_out(limit)));
                }
            },
            None => drive.await,
        };

        match joined {
            Ok(Ok(run)) => completed(task, run),
            Ok(Err(e)) => (None, Err(engine_fault(&e))),
            Err(e) => {
                error!(task = %task.id, error = %e, "Action run crashed");
                (None, Err(join_fault(e)))
            }
        }
    }
}

fn completed(task: &TaskDescriptor, run: ActionRun) -> RunResult {
    let state = run.state();
    debug!(
        task = %task.id,
        run_id = %run.run_id(),
        state = %state,
        steps = run.steps(),
        "Action run finished"
    );
    (Some(state), run.into_result())
}

fn engine_fault(e: &EngineError) -> TaskFailure {
    TaskFailure::new(ErrorKind::ExecutionFault, e.to_string())
}

fn timed_out(limit: Duration) -> TaskFailure {
    TaskFailure::new(
        ErrorKind::TimedOut,
        format!("action run exceeded {:.1}s", limit.as_secs_f64()),
    )
}

/// Failure for a spawned task that panicked or was cancelled.
pub(crate) fn join_fault(e: JoinError) -> TaskFailure {
    let message = if e.is_panic() {
        format!("panicked: {}", panic_message(e.into_panic()))
    } else {
        "cancelled".to_string()
    };
    TaskFailure::new(ErrorKind::ExecutionFault, message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Build the outcome for a task.
pub(crate) fn finish(
    task: &TaskDescriptor,
    session: String,
    started_at: DateTime<Utc>,
    final_state: Option<ActionState>,
    result: Result<ActionOutput, TaskFailure>,
) -> TaskOutcome {
    let outcome = TaskOutcome {
        task_id: task.id.clone(),
        index: task.index,
        label: task.label.clone(),
        params: task.params.clone(),
        session,
        final_state,
        result,
        started_at,
        finished_at: Utc::now(),
    };

    let task_id = &outcome.task_id;
    let duration_ms = outcome.duration_ms();
    match &outcome.result {
        Ok(output) => info!(task = %task_id, output = %output, duration_ms, "Task succeeded"),
        Err(failure) => info!(task = %task_id, kind = %failure.kind, duration_ms, "Task failed"),
    }

    outcome
}
