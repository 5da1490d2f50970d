//! Type definitions for the desktop engine step protocol.

use deskrun_core::{ActionOutput, ActionState, ResourceAssignment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// What the caller asks of a desktop when provisioning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Desktop (container) name.
    pub name: String,

    /// Ports the desktop must bind.
    pub ports: ResourceAssignment,

    /// Index of the task the desktop is provisioned for.
    pub task_index: u32,

    /// Task parameters the desktop's agent works with.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Opaque reference to a provisioned desktop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Engine-assigned identifier (e.g. a container id).
    pub id: String,

    /// Desktop name the handle was provisioned under.
    pub name: String,
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Whether the engine may pause on input and safety checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Pauses are surfaced to the caller's handlers.
    #[default]
    Interactive,
    /// The engine resolves every pause on its own.
    Auto,
}

impl InteractionMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// Input for the next engine step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum StepInput {
    /// Initial instructions of the run.
    Instruction(String),
    /// Keep going after a `running` step.
    Continue,
    /// Answer to a `needs_input` pause.
    Reply(String),
    /// Safety checks acknowledged; execute the pending operation.
    Proceed,
}

/// One message the agent produced while asking for input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

fn default_role() -> String {
    "assistant".to_string()
}

impl AgentMessage {
    /// Assistant message with a single text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: default_role(),
            content: vec![ContentItem::Text { text: text.into() }],
        }
    }

    /// All text parts joined with a space.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Screenshot { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Content item in an agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Text content.
    Text { text: String },

    /// Screenshot reference.
    Screenshot {
        #[serde(default)]
        path: Option<String>,
    },
}

/// A check that gates a risky operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// The operation a set of safety checks is gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub call_id: String,
    pub action: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Status returned by one engine step, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStep {
    /// Progress was made; call again with `StepInput::Continue`.
    Running {
        #[serde(default)]
        note: Option<String>,
    },

    /// The agent asks the operator something.
    NeedsInput {
        #[serde(default)]
        messages: Vec<AgentMessage>,
    },

    /// The agent wants to run an operation gated by safety checks.
    NeedsSafetyCheck {
        #[serde(default)]
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    },

    /// The task finished.
    Complete { output: ActionOutput },

    /// The task failed.
    Error { message: String },

    /// Status outside the recognized set.
    Unknown { raw_status: String },
}

impl AgentStep {
    const RECOGNIZED: [&'static str; 5] = [
        "running",
        "needs_input",
        "needs_safety_check",
        "complete",
        "error",
    ];

    /// Decode a step from its wire representation.
    ///
    /// An unrecognized or missing `status` decodes to `Unknown` instead of
    /// failing; a recognized status with a malformed payload is an error.
    pub fn from_wire(value: Value) -> Result<Self, serde_json::Error> {
        let status = match value.get("status") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "<missing>".to_string(),
        };

        if !Self::RECOGNIZED.contains(&status.as_str()) {
            return Ok(Self::Unknown { raw_status: status });
        }

        // Free-text answers are classified once, here
        match serde_json::from_value(value)? {
            Self::Complete {
                output: ActionOutput::Text(text),
            } => Ok(Self::Complete {
                output: ActionOutput::from_text(text),
            }),
            step => Ok(step),
        }
    }

    /// The action state this step puts the run in.
    pub fn state(&self) -> ActionState {
        match self {
            Self::Running { .. } => ActionState::Running,
            Self::NeedsInput { .. } => ActionState::NeedsInput,
            Self::NeedsSafetyCheck { .. } => ActionState::NeedsSafetyCheck,
            Self::Complete { .. } => ActionState::Complete,
            Self::Error { .. } => ActionState::Error,
            Self::Unknown { .. } => ActionState::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_recognized_statuses() {
        let step = AgentStep::from_wire(json!({
            "status": "complete",
            "output": { "numeric": 231.0 }
        }))
        .unwrap();
        assert_eq!(
            step,
            AgentStep::Complete {
                output: ActionOutput::Numeric(231.0)
            }
        );

        let step = AgentStep::from_wire(json!({
            "status": "needs_safety_check",
            "checks": [{ "id": "sc-1", "message": "Irreversible purchase" }],
            "operation": { "call_id": "call-9", "action": "click" }
        }))
        .unwrap();
        assert_eq!(step.state(), ActionState::NeedsSafetyCheck);
    }

    #[test]
    fn test_free_text_answer_is_classified() {
        let step = AgentStep::from_wire(json!({
            "status": "complete",
            "output": { "text": "$1,204" }
        }))
        .unwrap();
        assert_eq!(
            step,
            AgentStep::Complete {
                output: ActionOutput::Numeric(1204.0)
            }
        );
    }

    #[test]
    fn test_decode_unrecognized_status() {
        let step = AgentStep::from_wire(json!({ "status": "paused_for_lunch" })).unwrap();
        assert_eq!(
            step,
            AgentStep::Unknown {
                raw_status: "paused_for_lunch".to_string()
            }
        );

        let step = AgentStep::from_wire(json!({ "output": "231" })).unwrap();
        assert_eq!(step.state(), ActionState::Unknown);
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(AgentStep::from_wire(json!({ "status": "error" })).is_err());
    }

    #[test]
    fn test_joined_text_skips_screenshots() {
        let msg = AgentMessage {
            role: "assistant".to_string(),
            content: vec![
                ContentItem::Text {
                    text: "Does this look right?".to_string(),
                },
                ContentItem::Screenshot { path: None },
                ContentItem::Text {
                    text: "Reply yes or no.".to_string(),
                },
            ],
        };
        assert_eq!(msg.joined_text(), "Does this look right? Reply yes or no.");
    }

    #[test]
    fn test_step_input_serialization() {
        let json = serde_json::to_string(&StepInput::Reply("yes".to_string())).unwrap();
        assert_eq!(json, r#"{"type":"reply","text":"yes"}"#);
        let json = serde_json::to_string(&StepInput::Proceed).unwrap();
        assert_eq!(json, r#"{"type":"proceed"}"#);
    }
}
