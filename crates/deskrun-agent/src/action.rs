//! The action state machine.
//!
//! [`ActionDriver::drive`] runs one automation task inside a provisioned
//! desktop until it reaches a terminal state:
//!
//! ```text
//!            ┌──────────── reply / proceed ────────────┐
//!            ▼                                          │
//!        RUNNING ──► NEEDS_INPUT / NEEDS_SAFETY_CHECK ──┤
//!            │                                          └─ abort / decline ──► ABORTED
//!            ├──► COMPLETE
//!            ├──► ERROR
//!            └──► UNKNOWN
//! ```
//!
//! Pauses are resolved by the [`ActionHandler`] of an interactive run. In
//! auto mode the engine resolves them itself, so a pause reaching the driver
//! ends the run as `UNKNOWN`.

use std::fmt;
use std::sync::Arc;

use deskrun_core::{ActionOutput, ActionState, ErrorKind, RunId, TaskFailure};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::DesktopEngine;
use crate::error::EngineError;
use crate::handler::{ActionHandler, InputReply};
use crate::types::{AgentStep, InteractionMode, SessionHandle, StepInput};

/// How pauses are resolved.
#[derive(Clone)]
pub enum ActionMode {
    /// The engine resolves pauses; no handler is consulted.
    Auto,
    /// Pauses are handed to the given handler.
    Interactive(Arc<dyn ActionHandler>),
}

impl ActionMode {
    /// The flag passed to the engine on every step.
    pub fn interaction(&self) -> InteractionMode {
        match self {
            Self::Auto => InteractionMode::Auto,
            Self::Interactive(_) => InteractionMode::Interactive,
        }
    }

    fn handler(&self) -> Option<&Arc<dyn ActionHandler>> {
        match self {
            Self::Auto => None,
            Self::Interactive(handler) => Some(handler),
        }
    }
}

impl fmt::Debug for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("Auto"),
            Self::Interactive(_) => f.write_str("Interactive"),
        }
    }
}

/// One line of a run's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Instruction { text: String },
    Progress { text: String },
    AgentAsked { text: String },
    OperatorReplied { text: String },
    SafetyCheck {
        action: String,
        checks: Vec<String>,
        acknowledged: bool,
    },
}

/// One execution of the state machine against a session.
///
/// Only the driver mutates a run; callers receive it by value once it is
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    run_id: RunId,
    state: ActionState,
    transcript: Vec<TranscriptEntry>,
    output: Option<ActionOutput>,
    error: Option<String>,
    steps: u32,
}

impl ActionRun {
    fn new() -> Self {
        Self {
            run_id: RunId::generate(),
            state: ActionState::Running,
            transcript: Vec::new(),
            output: None,
            error: None,
            steps: 0,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn output(&self) -> Option<&ActionOutput> {
        self.output.as_ref()
    }

    /// Error message, unrecognized status or abort reason.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of engine steps taken.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Convert a terminal run into an outcome result.
    pub fn into_result(self) -> Result<ActionOutput, TaskFailure> {
        let reason = self.error.unwrap_or_default();
        match (self.state, self.output) {
            (ActionState::Complete, Some(output)) => Ok(output),
            (ActionState::Error, _) => Err(TaskFailure::new(ErrorKind::AutomationError, reason)),
            (ActionState::Unknown, _) => {
                Err(TaskFailure::new(ErrorKind::UnrecognizedStatus, reason))
            }
            (ActionState::Aborted, _) => Err(TaskFailure::new(ErrorKind::Aborted, reason)),
            (state, _) => Err(TaskFailure::new(
                ErrorKind::ExecutionFault,
                format!("run ended in non-terminal state {}", state),
            )),
        }
    }

    fn push(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
    }

    fn finish(mut self, state: ActionState, error: impl Into<String>) -> Self {
        self.state = state;
        self.error = Some(error.into());
        self
    }

    fn complete(mut self, output: ActionOutput) -> Self {
        self.state = ActionState::Complete;
        self.output = Some(output);
        self
    }
}

/// Drives action runs against one engine.
#[derive(Clone)]
pub struct ActionDriver {
    engine: Arc<dyn DesktopEngine>,
    mode: ActionMode,
}

impl ActionDriver {
    pub fn new(engine: Arc<dyn DesktopEngine>, mode: ActionMode) -> Self {
        Self { engine, mode }
    }

    pub fn mode(&self) -> &ActionMode {
        &self.mode
    }

    /// Run `prompt` in the given desktop until a terminal state.
    ///
    /// Engine and handler faults are returned as errors; every status the
    /// engine reports, recognized or not, ends in an `Ok` run.
    pub async fn drive(
        &self,
        handle: &SessionHandle,
        prompt: &str,
    ) -> Result<ActionRun, EngineError> {
        let mut run = ActionRun::new();
        let interaction = self.mode.interaction();

        info!(
            run_id = %run.run_id,
            session = %handle.name,
            mode = ?self.mode,
            prompt_len = prompt.len(),
            "Starting action run"
        );

        run.push(TranscriptEntry::Instruction {
            text: prompt.to_string(),
        });
        let mut input = StepInput::Instruction(prompt.to_string());

        loop {
            run.steps += 1;
            let step = self.engine.step(handle, input, interaction).await?;
            run.state = step.state();
            debug!(
                run_id = %run.run_id,
                step = run.steps,
                status = %run.state,
                "Engine step"
            );

            input = match step {
                AgentStep::Running { note } => {
                    if let Some(text) = note {
                        run.push(TranscriptEntry::Progress { text });
                    }
                    StepInput::Continue
                }

                AgentStep::NeedsInput { messages } => {
                    let Some(handler) = self.mode.handler() else {
                        warn!(run_id = %run.run_id, "Engine asked for input in auto mode");
                        return Ok(run.finish(ActionState::Unknown, "needs_input in auto mode"));
                    };

                    for message in &messages {
                        run.push(TranscriptEntry::AgentAsked {
                            text: message.joined_text(),
                        });
                    }

                    match handler.on_input(messages).await? {
                        InputReply::Respond(text) => {
                            run.push(TranscriptEntry::OperatorReplied { text: text.clone() });
                            run.state = ActionState::Running;
                            StepInput::Reply(text)
                        }
                        InputReply::Abort => {
                            info!(run_id = %run.run_id, "Operator aborted the run");
                            return Ok(run.finish(
                                ActionState::Aborted,
                                "operator aborted at input request",
                            ));
                        }
                    }
                }

                AgentStep::NeedsSafetyCheck { checks, operation } => {
                    let Some(handler) = self.mode.handler() else {
                        warn!(run_id = %run.run_id, "Engine raised a safety check in auto mode");
                        return Ok(
                            run.finish(ActionState::Unknown, "needs_safety_check in auto mode")
                        );
                    };

                    let action = operation.action.clone();
                    let messages: Vec<String> = checks.iter().map(|c| c.message.clone()).collect();
                    let proceed = handler.on_safety_check(checks, operation).await?;
                    run.push(TranscriptEntry::SafetyCheck {
                        action: action.clone(),
                        checks: messages,
                        acknowledged: proceed,
                    });

                    if !proceed {
                        info!(run_id = %run.run_id, action = %action, "Safety check declined");
                        return Ok(run.finish(
                            ActionState::Aborted,
                            format!("safety check declined for '{}'", action),
                        ));
                    }
                    run.state = ActionState::Running;
                    StepInput::Proceed
                }

                AgentStep::Complete { output } => {
                    info!(run_id = %run.run_id, steps = run.steps, "Action run complete");
                    if let Some(handler) = self.mode.handler() {
                        handler.on_complete(&output).await;
                    }
                    return Ok(run.complete(output));
                }

                AgentStep::Error { message } => {
                    warn!(run_id = %run.run_id, error = %message, "Engine reported an error");
                    if let Some(handler) = self.mode.handler() {
                        handler.on_error(&message).await;
                    }
                    return Ok(run.finish(ActionState::Error, message));
                }

                AgentStep::Unknown { raw_status } => {
                    warn!(run_id = %run.run_id, status = %raw_status, "Unrecognized engine status");
                    return Ok(run.finish(
                        ActionState::Unknown,
                        format!("unrecognized status '{}'", raw_status),
                    ));
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{AcknowledgeHandler, DeclineHandler, HandlerEvent};
    use crate::scripted::{Script, ScriptedEngine, ScriptedStep};
    use crate::types::{AgentMessage, PendingOperation, SafetyCheck, SessionConfig};
    use async_trait::async_trait;
    use deskrun_core::PortBases;

    fn safety_step() -> ScriptedStep {
        ScriptedStep::Step(AgentStep::NeedsSafetyCheck {
            checks: vec![SafetyCheck {
                id: "sc-1".to_string(),
                code: None,
                message: "About to submit a form".to_string(),
            }],
            operation: PendingOperation {
                call_id: "call-7".to_string(),
                action: "click".to_string(),
                arguments: serde_json::Value::Null,
            },
        })
    }

    async fn provision(engine: &ScriptedEngine) -> SessionHandle {
        let config = SessionConfig {
            name: "desktop-1".to_string(),
            ports: PortBases::default().allocate(1).unwrap(),
            task_index: 1,
            params: Default::default(),
        };
        engine.provision(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_auto_mode_completes() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_default(vec![
            ScriptedStep::running("opened flights page"),
            ScriptedStep::complete("231"),
        ])));
        let handle = provision(&engine).await;

        let driver = ActionDriver::new(engine.clone(), ActionMode::Auto);
        let run = driver.drive(&handle, "find the cheapest flight").await.unwrap();

        assert_eq!(run.state(), ActionState::Complete);
        assert_eq!(run.steps(), 2);
        assert_eq!(run.output(), Some(&ActionOutput::Numeric(231.0)));
        assert!(matches!(
            run.transcript()[1],
            TranscriptEntry::Progress { .. }
        ));
        assert_eq!(run.into_result().unwrap(), ActionOutput::Numeric(231.0));
    }

    #[tokio::test]
    async fn test_input_reply_resumes_run() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_default(vec![
            ScriptedStep::Step(AgentStep::NeedsInput {
                messages: vec![AgentMessage::text("Does this list look correct?")],
            }),
            ScriptedStep::complete("done"),
        ])));
        let handle = provision(&engine).await;
        let (handler, mut events) = AcknowledgeHandler::new("yes");

        let driver = ActionDriver::new(engine.clone(), ActionMode::Interactive(Arc::new(handler)));
        let run = driver.drive(&handle, "collect directors").await.unwrap();

        assert_eq!(run.state(), ActionState::Complete);
        assert_eq!(engine.stats().replies, vec!["yes".to_string()]);
        assert!(matches!(events.try_recv().unwrap(), HandlerEvent::InputRequested(_)));
        assert!(matches!(events.try_recv().unwrap(), HandlerEvent::Completed(_)));
    }

    #[tokio::test]
    async fn test_input_abort_stops_without_further_steps() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_default(vec![
            ScriptedStep::Step(AgentStep::NeedsInput { messages: vec![] }),
            ScriptedStep::complete("should never be reached"),
        ])));
        let handle = provision(&engine).await;
        let (handler, _events) = DeclineHandler::new();

        let driver = ActionDriver::new(engine.clone(), ActionMode::Interactive(Arc::new(handler)));
        let run = driver.drive(&handle, "anything").await.unwrap();

        assert_eq!(run.state(), ActionState::Aborted);
        assert_eq!(run.steps(), 1);
        assert_eq!(engine.stats().steps, 1);
        let failure = run.into_result().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn test_acknowledged_safety_check_executes_operation() {
        let engine = Arc::new(ScriptedEngine::new(
            Script::new().with_default(vec![safety_step(), ScriptedStep::complete("ok")]),
        ));
        let handle = provision(&engine).await;
        let (handler, _events) = AcknowledgeHandler::new("");

        let driver = ActionDriver::new(engine.clone(), ActionMode::Interactive(Arc::new(handler)));
        let run = driver.drive(&handle, "submit").await.unwrap();

        assert_eq!(run.state(), ActionState::Complete);
        assert_eq!(engine.stats().executed_operations, vec!["call-7".to_string()]);
    }

    #[tokio::test]
    async fn test_declined_safety_check_aborts_silently() {
        let engine = Arc::new(ScriptedEngine::new(
            Script::new().with_default(vec![safety_step(), ScriptedStep::complete("ok")]),
        ));
        let handle = provision(&engine).await;
        let (handler, mut events) = DeclineHandler::new();

        let driver = ActionDriver::new(engine.clone(), ActionMode::Interactive(Arc::new(handler)));
        let run = driver.drive(&handle, "submit").await.unwrap();

        assert_eq!(run.state(), ActionState::Aborted);
        assert!(run.output().is_none());
        assert!(engine.stats().executed_operations.is_empty());
        assert!(matches!(
            run.transcript().last(),
            Some(TranscriptEntry::SafetyCheck {
                acknowledged: false,
                ..
            })
        ));
        // no on_error notification for a decline
        assert!(matches!(events.try_recv().unwrap(), HandlerEvent::SafetyCheck { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_status_is_retained_verbatim() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_default(vec![
            ScriptedStep::Step(AgentStep::Error {
                message: "page failed to load".to_string(),
            }),
        ])));
        let handle = provision(&engine).await;

        let driver = ActionDriver::new(engine.clone(), ActionMode::Auto);
        let run = driver.drive(&handle, "go").await.unwrap();

        assert_eq!(run.state(), ActionState::Error);
        assert_eq!(run.error(), Some("page failed to load"));
        let failure = run.into_result().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::AutomationError);
        assert_eq!(failure.message, "page failed to load");
    }

    #[tokio::test]
    async fn test_unknown_status_is_a_failure() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_default(vec![
            ScriptedStep::Step(AgentStep::Unknown {
                raw_status: "rate_limited".to_string(),
            }),
        ])));
        let handle = provision(&engine).await;

        let driver = ActionDriver::new(engine.clone(), ActionMode::Auto);
        let run = driver.drive(&handle, "go").await.unwrap();

        assert_eq!(run.state(), ActionState::Unknown);
        let failure = run.into_result().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::UnrecognizedStatus);
        assert!(failure.message.contains("rate_limited"));
    }

    #[tokio::test]
    async fn test_engine_fault_propagates() {
        let engine = Arc::new(ScriptedEngine::new(
            Script::new().with_default(vec![ScriptedStep::Fault("browser crashed".to_string())]),
        ));
        let handle = provision(&engine).await;

        let driver = ActionDriver::new(engine.clone(), ActionMode::Auto);
        let err = driver.drive(&handle, "go").await.unwrap_err();
        assert!(matches!(err, EngineError::Fault(_)));
    }

    /// Engine that ignores the auto flag and always pauses.
    struct PausingEngine;

    #[async_trait]
    impl DesktopEngine for PausingEngine {
        async fn provision(&self, config: &SessionConfig) -> Result<SessionHandle, EngineError> {
            Ok(SessionHandle {
                id: "1".to_string(),
                name: config.name.clone(),
            })
        }

        async fn teardown(&self, _handle: &SessionHandle) -> Result<(), EngineError> {
            Ok(())
        }

        async fn step(
            &self,
            _handle: &SessionHandle,
            _input: StepInput,
            _mode: InteractionMode,
        ) -> Result<AgentStep, EngineError> {
            Ok(AgentStep::NeedsInput { messages: vec![] })
        }
    }

    #[tokio::test]
    async fn test_pause_in_auto_mode_is_unknown() {
        let handle = SessionHandle {
            id: "1".to_string(),
            name: "desktop-1".to_string(),
        };
        let driver = ActionDriver::new(Arc::new(PausingEngine), ActionMode::Auto);
        let run = driver.drive(&handle, "go").await.unwrap();

        assert_eq!(run.state(), ActionState::Unknown);
        assert_eq!(run.into_result().unwrap_err().kind, ErrorKind::UnrecognizedStatus);
    }
}
