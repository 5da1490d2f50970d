//! Error types for desktop engines.

use thiserror::Error;

/// Errors an engine can raise while provisioning, stepping or tearing down.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The sandbox could not be provisioned.
    #[error("Failed to provision desktop '{name}': {reason}")]
    ProvisionFailed { name: String, reason: String },

    /// The handle does not refer to a desktop this engine knows.
    #[error("Unknown desktop handle: {0}")]
    UnknownHandle(String),

    /// Teardown did not complete cleanly.
    #[error("Failed to tear down desktop '{name}': {reason}")]
    TeardownFailed { name: String, reason: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error during communication with the engine.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A caller-supplied handler failed to produce an answer.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Any other fault raised while driving the agent.
    #[error("Engine fault: {0}")]
    Fault(String),
}
