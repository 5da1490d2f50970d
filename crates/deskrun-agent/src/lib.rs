//! Desktop automation contract for DeskRun
//!
//! This crate defines what DeskRun expects from a desktop automation engine
//! ([`DesktopEngine`]), how callers resolve interactive pauses
//! ([`ActionHandler`]), and the state machine that drives one run to a
//! terminal state ([`ActionDriver`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deskrun_agent::{
//!     AcknowledgeHandler, ActionDriver, ActionMode, DesktopEngine, Script, ScriptedEngine,
//!     SessionConfig,
//! };
//! use deskrun_core::PortBases;
//!
//! async fn run_agent() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(ScriptedEngine::new(Script::from_json(
//!         r#"{ "default": [{ "status": "complete", "output": { "numeric": 231 } }] }"#,
//!     )?));
//!
//!     let handle = engine
//!         .provision(&SessionConfig {
//!             name: "desktop-1".to_string(),
//!             ports: PortBases::default().allocate(1)?,
//!             task_index: 1,
//!             params: Default::default(),
//!         })
//!         .await?;
//!
//!     let (handler, _events) = AcknowledgeHandler::new("yes");
//!     let driver = ActionDriver::new(engine.clone(), ActionMode::Interactive(Arc::new(handler)));
//!     let run = driver.drive(&handle, "What is the cheapest flight?").await?;
//!     engine.teardown(&handle).await?;
//!
//!     println!("Final state: {}", run.state());
//!     Ok(())
//! }
//! ```

mod action;
mod engine;
mod error;
mod handler;
mod scripted;
mod types;

// Re-export main types
pub use action::{ActionDriver, ActionMode, ActionRun, TranscriptEntry};
pub use engine::DesktopEngine;
pub use error::EngineError;
pub use handler::{AcknowledgeHandler, ActionHandler, DeclineHandler, HandlerEvent, InputReply};
pub use scripted::{EngineStats, Script, ScriptedEngine, ScriptedStep};
pub use types::{
    AgentMessage, AgentStep, ContentItem, InteractionMode, PendingOperation, SafetyCheck,
    SessionConfig, SessionHandle, StepInput,
};
