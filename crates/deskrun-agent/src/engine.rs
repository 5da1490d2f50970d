//! The contract DeskRun consumes from a desktop automation engine.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::{AgentStep, InteractionMode, SessionConfig, SessionHandle, StepInput};

/// A backend that provisions isolated desktops and drives an agent in them.
///
/// Implementations decide *what* the agent pauses on; the action state
/// machine decides how pauses are resolved.
#[async_trait]
pub trait DesktopEngine: Send + Sync {
    /// Start an isolated desktop bound to the configured ports.
    async fn provision(&self, config: &SessionConfig) -> Result<SessionHandle, EngineError>;

    /// Stop a desktop. Must be idempotent.
    async fn teardown(&self, handle: &SessionHandle) -> Result<(), EngineError>;

    /// Run the agent until its next status.
    ///
    /// In `InteractionMode::Auto` the engine resolves input requests and
    /// safety checks itself and must not return `NeedsInput` or
    /// `NeedsSafetyCheck`.
    async fn step(
        &self,
        handle: &SessionHandle,
        input: StepInput,
        mode: InteractionMode,
    ) -> Result<AgentStep, EngineError>;
}
