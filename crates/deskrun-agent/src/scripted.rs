//! A desktop engine that replays declarative scripts.
//!
//! The scripted engine stands in for a real sandbox runtime: it "provisions"
//! desktops in memory, emulates port binding, and answers every step from a
//! per-task list of statuses. It records what happened so callers can check
//! lifecycle guarantees afterwards.
//!
//! Script format (JSON):
//!
//! ```json
//! {
//!   "default": [{ "status": "complete", "output": { "text": "done" } }],
//!   "tasks": {
//!     "2": [
//!       { "status": "delay", "ms": 200 },
//!       { "status": "needs_safety_check",
//!         "checks": [{ "id": "sc-1", "message": "Confirm purchase" }],
//!         "operation": { "call_id": "c-1", "action": "click" } },
//!       { "status": "complete", "output": { "numeric": 189 } }
//!     ]
//!   },
//!   "provision_failures": [4]
//! }
//! ```
//!
//! Besides the engine statuses a step can be `delay` (sleep `ms`), `fault`
//! (the step call fails with `message`) or `panic` (the step call panics).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deskrun_core::ActionOutput;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::DesktopEngine;
use crate::error::EngineError;
use crate::types::{
    AgentStep, InteractionMode, PendingOperation, SessionConfig, SessionHandle, StepInput,
};

/// One scripted step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedStep {
    /// Return this status to the caller.
    Step(AgentStep),
    /// Sleep before moving to the next step.
    Delay(Duration),
    /// Fail the step call.
    Fault(String),
    /// Panic inside the step call.
    Panic(String),
}

impl ScriptedStep {
    /// `running` step with a progress note.
    pub fn running(note: impl Into<String>) -> Self {
        Self::Step(AgentStep::Running {
            note: Some(note.into()),
        })
    }

    /// `complete` step whose free-text answer is classified by `ActionOutput::from_text`.
    pub fn complete(answer: impl Into<String>) -> Self {
        Self::Step(AgentStep::Complete {
            output: ActionOutput::from_text(answer),
        })
    }

    pub fn delay_ms(ms: u64) -> Self {
        Self::Delay(Duration::from_millis(ms))
    }

    /// Decode a step from JSON.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let message = |value: &Value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("scripted fault")
                .to_string()
        };

        match value.get("status").and_then(Value::as_str) {
            Some("delay") => {
                let ms = value.get("ms").and_then(Value::as_u64).ok_or_else(|| {
                    EngineError::ProtocolError("delay step requires an integer 'ms'".to_string())
                })?;
                Ok(Self::delay_ms(ms))
            }
            Some("fault") => Ok(Self::Fault(message(&value))),
            Some("panic") => Ok(Self::Panic(message(&value))),
            _ => Ok(Self::Step(AgentStep::from_wire(value)?)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    default: Vec<Value>,
    #[serde(default)]
    tasks: BTreeMap<u32, Vec<Value>>,
    #[serde(default)]
    provision_failures: Vec<u32>,
}

/// Steps to replay, per task index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    default: Vec<ScriptedStep>,
    tasks: BTreeMap<u32, Vec<ScriptedStep>>,
    provision_failures: BTreeSet<u32>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON script.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file: ScriptFile = serde_json::from_str(json)?;

        let decode = |steps: Vec<Value>| -> Result<Vec<ScriptedStep>, EngineError> {
            steps.into_iter().map(ScriptedStep::from_value).collect()
        };

        let mut tasks = BTreeMap::new();
        for (index, steps) in file.tasks {
            tasks.insert(index, decode(steps)?);
        }

        Ok(Self {
            default: decode(file.default)?,
            tasks,
            provision_failures: file.provision_failures.into_iter().collect(),
        })
    }

    /// Builder method to set the steps used by tasks without their own script.
    pub fn with_default(mut self, steps: Vec<ScriptedStep>) -> Self {
        self.default = steps;
        self
    }

    /// Builder method to script one task.
    pub fn with_task(mut self, index: u32, steps: Vec<ScriptedStep>) -> Self {
        self.tasks.insert(index, steps);
        self
    }

    /// Builder method to make provisioning fail for one task.
    pub fn with_provision_failure(mut self, index: u32) -> Self {
        self.provision_failures.insert(index);
        self
    }

    fn steps_for(&self, index: u32) -> VecDeque<ScriptedStep> {
        self.tasks
            .get(&index)
            .unwrap_or(&self.default)
            .iter()
            .cloned()
            .collect()
    }
}

/// Counters recorded by the scripted engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    /// Successful provision calls.
    pub provisions: usize,
    /// All teardown calls, including repeated ones.
    pub teardown_calls: usize,
    /// Teardowns that actually stopped a desktop.
    pub teardowns: usize,
    /// Step calls.
    pub steps: usize,
    /// Desktops currently running.
    pub live: usize,
    /// Highest number of desktops running at the same time.
    pub peak_live: usize,
    /// Call ids of operations executed after an acknowledged safety check.
    pub executed_operations: Vec<String>,
    /// Replies received for input requests.
    pub replies: Vec<String>,
    /// Task parameters each desktop was provisioned with, by desktop name.
    pub params: BTreeMap<String, BTreeMap<String, String>>,
}

struct Desktop {
    name: String,
    ports: [u16; 4],
    remaining: VecDeque<ScriptedStep>,
    pending_operation: Option<PendingOperation>,
}

#[derive(Default)]
struct EngineState {
    desktops: HashMap<String, Desktop>,
    stats: EngineStats,
}

/// Engine replaying a [`Script`].
pub struct ScriptedEngine {
    script: Script,
    state: Mutex<EngineState>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Snapshot of the recorded counters.
    pub fn stats(&self) -> EngineStats {
        self.state
            .lock()
            .map(|state| state.stats.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EngineState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::Fault("scripted engine state lock poisoned".to_string()))
    }

    /// Apply the caller's input and take the next step to replay.
    fn next_step(
        &self,
        handle: &SessionHandle,
        input: &StepInput,
    ) -> Result<Option<ScriptedStep>, EngineError> {
        let mut state = self.lock()?;
        let EngineState { desktops, stats } = &mut *state;
        let desktop = desktops
            .get_mut(&handle.id)
            .ok_or_else(|| EngineError::UnknownHandle(handle.to_string()))?;

        match input {
            StepInput::Proceed => {
                if let Some(operation) = desktop.pending_operation.take() {
                    debug!(
                        desktop = %desktop.name,
                        action = %operation.action,
                        "Executing gated operation"
                    );
                    stats.executed_operations.push(operation.call_id);
                }
            }
            StepInput::Reply(text) => stats.replies.push(text.clone()),
            StepInput::Instruction(_) | StepInput::Continue => {}
        }
        // An operation not proceeded with right away is dropped
        desktop.pending_operation = None;

        Ok(desktop.remaining.pop_front())
    }

    fn remember_operation(
        &self,
        handle: &SessionHandle,
        operation: &PendingOperation,
    ) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if let Some(desktop) = state.desktops.get_mut(&handle.id) {
            desktop.pending_operation = Some(operation.clone());
        }
        Ok(())
    }

    fn execute_now(&self, operation: PendingOperation) -> Result<(), EngineError> {
        self.lock()?.stats.executed_operations.push(operation.call_id);
        Ok(())
    }
}

#[async_trait]
impl DesktopEngine for ScriptedEngine {
    async fn provision(&self, config: &SessionConfig) -> Result<SessionHandle, EngineError> {
        if self.script.provision_failures.contains(&config.task_index) {
            return Err(EngineError::ProvisionFailed {
                name: config.name.clone(),
                reason: "scripted provision failure".to_string(),
            });
        }

        let mut state = self.lock()?;
        let ports = config.ports.ports();
        if let Some(busy) = state
            .desktops
            .values()
            .find(|d| d.ports.iter().any(|p| ports.contains(p)))
        {
            return Err(EngineError::ProvisionFailed {
                name: config.name.clone(),
                reason: format!("port already bound by '{}'", busy.name),
            });
        }

        let handle = SessionHandle {
            id: Uuid::new_v4().to_string(),
            name: config.name.clone(),
        };
        state.desktops.insert(
            handle.id.clone(),
            Desktop {
                name: config.name.clone(),
                ports,
                remaining: self.script.steps_for(config.task_index),
                pending_operation: None,
            },
        );

        let stats = &mut state.stats;
        stats.provisions += 1;
        stats.live += 1;
        stats.peak_live = stats.peak_live.max(stats.live);
        stats.params.insert(config.name.clone(), config.params.clone());

        info!(desktop = %config.name, ports = %config.ports, "Desktop provisioned");
        Ok(handle)
    }

    async fn teardown(&self, handle: &SessionHandle) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.stats.teardown_calls += 1;
        if state.desktops.remove(&handle.id).is_some() {
            state.stats.teardowns += 1;
            state.stats.live -= 1;
            info!(desktop = %handle.name, "Desktop torn down");
        }
        Ok(())
    }

    async fn step(
        &self,
        handle: &SessionHandle,
        input: StepInput,
        mode: InteractionMode,
    ) -> Result<AgentStep, EngineError> {
        self.lock()?.stats.steps += 1;
        let mut input = input;

        loop {
            // The lock is released before sleeping or panicking
            let next = self.next_step(handle, &input)?;
            input = StepInput::Continue;

            match next {
                None => {
                    return Err(EngineError::ProtocolError(format!(
                        "script for '{}' is exhausted",
                        handle.name
                    )))
                }
                Some(ScriptedStep::Delay(duration)) => tokio::time::sleep(duration).await,
                Some(ScriptedStep::Fault(message)) => return Err(EngineError::Fault(message)),
                Some(ScriptedStep::Panic(message)) => panic!("{}", message),
                Some(ScriptedStep::Step(AgentStep::NeedsInput { .. })) if mode.is_auto() => {
                    debug!(desktop = %handle.name, "Auto mode: skipping input request");
                }
                Some(ScriptedStep::Step(AgentStep::NeedsSafetyCheck { operation, .. }))
                    if mode.is_auto() =>
                {
                    debug!(
                        desktop = %handle.name,
                        action = %operation.action,
                        "Auto mode: executing gated operation"
                    );
                    self.execute_now(operation)?;
                }
                Some(ScriptedStep::Step(step)) => {
                    if let AgentStep::NeedsSafetyCheck { operation, .. } = &step {
                        self.remember_operation(handle, operation)?;
                    }
                    return Ok(step);
                }
            }
        }
    }
}
