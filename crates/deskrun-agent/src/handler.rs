//! Handlers that resolve interactive pauses.
//!
//! This module provides the `ActionHandler` trait and ready-to-use
//! implementations of it.

use async_trait::async_trait;
use deskrun_core::ActionOutput;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::EngineError;
use crate::types::{AgentMessage, PendingOperation, SafetyCheck};

/// Answer to an input request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputReply {
    /// Resume the run with this text as the next instruction.
    Respond(String),
    /// Stop the run; nothing further is sent to the engine.
    Abort,
}

/// Handler trait for interactive pauses.
///
/// Implement this trait to customize how your application answers input
/// requests and safety checks raised by the agent. One run never calls its
/// handler concurrently, but a handler shared across runs may be called
/// from several workers at once.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Called when the agent needs an answer from the operator.
    async fn on_input(&self, messages: Vec<AgentMessage>) -> Result<InputReply, EngineError>;

    /// Called when the agent wants to run an operation gated by checks.
    ///
    /// Return `true` to execute the operation, `false` to abort the run.
    async fn on_safety_check(
        &self,
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    ) -> Result<bool, EngineError>;

    /// Called once when the run completes.
    async fn on_complete(&self, _output: &ActionOutput) {}

    /// Called once when the engine reports an error.
    async fn on_error(&self, _message: &str) {}
}

/// Notification forwarded by the ready-made handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    InputRequested(Vec<AgentMessage>),
    SafetyCheck {
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    },
    Completed(ActionOutput),
    Failed(String),
}

/// A handler that acknowledges every safety check and answers every input
/// request with the same reply.
///
/// Use with caution - this lets the agent execute any gated operation
/// without confirmation.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use deskrun_agent::AcknowledgeHandler;
///
/// let (handler, mut rx) = AcknowledgeHandler::new("looks good, continue");
///
/// tokio::spawn(async move {
///     while let Some(event) = rx.recv().await {
///         println!("Handler event: {:?}", event);
///     }
/// });
///
/// // Use Arc::new(handler) with ActionMode::Interactive
/// ```
pub struct AcknowledgeHandler {
    reply: String,
    event_tx: mpsc::UnboundedSender<HandlerEvent>,
}

impl AcknowledgeHandler {
    /// Create a new handler with a receiver for its events.
    pub fn new(reply: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                reply: reply.into(),
                event_tx: tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl ActionHandler for AcknowledgeHandler {
    async fn on_input(&self, messages: Vec<AgentMessage>) -> Result<InputReply, EngineError> {
        trace!(messages = messages.len(), "Answering input request");
        // Receiver might be dropped
        self.event_tx.send(HandlerEvent::InputRequested(messages)).ok();
        Ok(InputReply::Respond(self.reply.clone()))
    }

    async fn on_safety_check(
        &self,
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    ) -> Result<bool, EngineError> {
        trace!(action = %operation.action, "Acknowledging safety checks");
        self.event_tx
            .send(HandlerEvent::SafetyCheck { checks, operation })
            .ok();
        Ok(true)
    }

    async fn on_complete(&self, output: &ActionOutput) {
        self.event_tx.send(HandlerEvent::Completed(output.clone())).ok();
    }

    async fn on_error(&self, message: &str) {
        self.event_tx
            .send(HandlerEvent::Failed(message.to_string()))
            .ok();
    }
}

/// A handler that declines every pause.
///
/// Useful for testing, or for seeing what an agent would ask for without
/// letting it proceed.
pub struct DeclineHandler {
    event_tx: mpsc::UnboundedSender<HandlerEvent>,
}

impl DeclineHandler {
    /// Create a new decline-all handler.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { event_tx: tx }, rx)
    }
}

#[async_trait]
impl ActionHandler for DeclineHandler {
    async fn on_input(&self, messages: Vec<AgentMessage>) -> Result<InputReply, EngineError> {
        trace!("Declining input request");
        self.event_tx.send(HandlerEvent::InputRequested(messages)).ok();
        Ok(InputReply::Abort)
    }

    async fn on_safety_check(
        &self,
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    ) -> Result<bool, EngineError> {
        trace!(action = %operation.action, "Declining safety checks");
        self.event_tx
            .send(HandlerEvent::SafetyCheck { checks, operation })
            .ok();
        Ok(false)
    }

    async fn on_complete(&self, output: &ActionOutput) {
        self.event_tx.send(HandlerEvent::Completed(output.clone())).ok();
    }

    async fn on_error(&self, message: &str) {
        self.event_tx
            .send(HandlerEvent::Failed(message.to_string()))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation() -> PendingOperation {
        PendingOperation {
            call_id: "call-1".to_string(),
            action: "click".to_string(),
            arguments: json!({ "x": 10, "y": 20 }),
        }
    }

    fn check() -> SafetyCheck {
        SafetyCheck {
            id: "sc-1".to_string(),
            code: Some("malicious_instructions".to_string()),
            message: "Page asks to confirm a payment".to_string(),
        }
    }

    #[tokio::test]
    async fn test_acknowledge_handler() {
        let (handler, mut rx) = AcknowledgeHandler::new("yes");

        let reply = handler
            .on_input(vec![AgentMessage::text("Is this correct?")])
            .await
            .unwrap();
        assert_eq!(reply, InputReply::Respond("yes".to_string()));

        let proceed = handler
            .on_safety_check(vec![check()], operation())
            .await
            .unwrap();
        assert!(proceed);

        assert!(matches!(rx.try_recv().unwrap(), HandlerEvent::InputRequested(_)));
        assert!(matches!(rx.try_recv().unwrap(), HandlerEvent::SafetyCheck { .. }));
    }

    #[tokio::test]
    async fn test_decline_handler() {
        let (handler, mut rx) = DeclineHandler::new();

        let reply = handler.on_input(vec![]).await.unwrap();
        assert_eq!(reply, InputReply::Abort);

        let proceed = handler
            .on_safety_check(vec![check()], operation())
            .await
            .unwrap();
        assert!(!proceed);

        handler.on_error("boom").await;
        assert!(matches!(rx.try_recv().unwrap(), HandlerEvent::InputRequested(_)));
        assert!(matches!(rx.try_recv().unwrap(), HandlerEvent::SafetyCheck { .. }));
        assert_eq!(rx.try_recv().unwrap(), HandlerEvent::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_tolerated() {
        let (handler, rx) = AcknowledgeHandler::new("ok");
        drop(rx);
        handler.on_complete(&ActionOutput::Numeric(1.0)).await;
        assert!(handler.on_input(vec![]).await.is_ok());
    }
}
