//! String identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Random v4 UUID.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifies a task descriptor and its outcome.
    TaskId
);

string_id!(
    /// Identifies one execution of the action state machine.
    RunId
);

impl TaskId {
    /// Default id for a slot index.
    pub fn for_index(index: u32) -> Self {
        Self(format!("task-{}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(TaskId::generate(), TaskId::generate());
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn test_index_ids() {
        let id = TaskId::for_index(3);
        assert_eq!(id.to_string(), "task-3");
        assert_eq!(id, TaskId::from("task-3"));
        assert_eq!(id.into_inner(), "task-3");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&TaskId::new("weekend-2")).unwrap();
        assert_eq!(json, "\"weekend-2\"");
    }
}
