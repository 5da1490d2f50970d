//! Worker pool configuration.

use std::time::Duration;

use deskrun_core::PortBases;
use serde::{Deserialize, Serialize};

/// What to do when a task's ports are held by another live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the task with `RESOURCE_CONFLICT`.
    #[default]
    Fail,
    /// Shift the whole assignment up one slot at a time, then fail.
    NextFree { max_attempts: u32 },
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on concurrently running tasks.
    pub max_workers: usize,

    /// Base port per kind.
    pub port_bases: PortBases,

    /// Port conflict policy.
    pub conflict_policy: ConflictPolicy,

    /// Limit on one action run; `None` waits forever.
    pub task_timeout: Option<Duration>,

    /// Prefix of session (desktop) names; the task index is appended.
    pub session_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            port_bases: PortBases::default(),
            conflict_policy: ConflictPolicy::Fail,
            task_timeout: Some(Duration::from_secs(600)),
            session_prefix: "deskrun".to_string(),
        }
    }
}

impl PoolConfig {
    /// Builder method to set the worker bound.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builder method to set the port bases.
    pub fn with_port_bases(mut self, bases: PortBases) -> Self {
        self.port_bases = bases;
        self
    }

    /// Builder method to set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Builder method to set (or clear) the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Builder method to set the session name prefix.
    pub fn with_session_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_prefix = prefix.into();
        self
    }

    /// Session name for a task index.
    pub fn session_name(&self, index: u32) -> String {
        format!("{}_{}", self.session_prefix, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.conflict_policy, ConflictPolicy::Fail);
        assert_eq!(config.port_bases, PortBases::default());
        assert!(config.task_timeout.is_some());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::default()
            .with_max_workers(3)
            .with_conflict_policy(ConflictPolicy::NextFree { max_attempts: 4 })
            .with_task_timeout(None)
            .with_session_prefix("weekend_desktop");

        assert_eq!(config.max_workers, 3);
        assert!(config.task_timeout.is_none());
        assert_eq!(config.session_name(2), "weekend_desktop_2");
    }
}
