//! Session lifecycle management.
//!
//! A [`Session`] is one provisioned desktop. [`SessionManager::start`]
//! reserves the session's ports in a registry shared by the whole pool and
//! provisions the desktop; [`SessionManager::stop`] tears it down. `stop` is
//! idempotent so cleanup paths can call it regardless of how far `start`
//! got. Both engine calls are bounded by the manager's lifecycle timeout.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use deskrun_agent::{DesktopEngine, SessionConfig, SessionHandle};
use deskrun_core::{PortBases, ResourceAssignment, SessionStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ConflictPolicy;
use crate::error::SessionError;

type PortMap = HashMap<u16, String>;

/// Ports currently held by live sessions, mapped to the holder's name.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    held: Arc<Mutex<PortMap>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PortMap> {
        // Only plain map operations run under this lock
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve every port of `assignment` for `holder`, or none of them.
    ///
    /// On conflict returns the first busy port and its holder.
    pub fn reserve(
        &self,
        assignment: &ResourceAssignment,
        holder: &str,
    ) -> Result<PortReservation, (u16, String)> {
        let mut held = self.lock();
        let ports = assignment.ports();

        if let Some((port, owner)) = ports
            .iter()
            .find_map(|p| held.get(p).map(|owner| (*p, owner.clone())))
        {
            return Err((port, owner));
        }

        for port in ports {
            held.insert(port, holder.to_string());
        }

        Ok(PortReservation {
            registry: self.clone(),
            ports,
        })
    }

    /// Returns true if the port is held by a live session.
    pub fn is_held(&self, port: u16) -> bool {
        self.lock().contains_key(&port)
    }

    /// Number of ports held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ports reserved for one session; released on drop.
#[derive(Debug)]
pub struct PortReservation {
    registry: PortRegistry,
    ports: [u16; 4],
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let mut held = self.registry.lock();
        for port in &self.ports {
            held.remove(port);
        }
    }
}

/// One isolated desktop owned by a worker.
#[derive(Debug)]
pub struct Session {
    name: String,
    index: u32,
    assignment: ResourceAssignment,
    params: BTreeMap<String, String>,
    handle: Option<SessionHandle>,
    reservation: Option<PortReservation>,
    status: SessionStatus,
}

impl Session {
    pub fn new(name: impl Into<String>, index: u32, assignment: ResourceAssignment) -> Self {
        Self {
            name: name.into(),
            index,
            assignment,
            params: BTreeMap::new(),
            handle: None,
            reservation: None,
            status: SessionStatus::NotStarted,
        }
    }

    /// Task parameters handed to the engine on provision.
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Ports the session runs on. May differ from the initial assignment
    /// under the next-free conflict policy.
    pub fn assignment(&self) -> &ResourceAssignment {
        &self.assignment
    }

    /// Engine handle of a running session.
    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }
}

/// Live-session counters, shared by every worker of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions started.
    pub started: usize,
    /// Sessions stopped.
    pub stopped: usize,
    /// Sessions running right now.
    pub live: usize,
    /// Highest number of sessions running at the same time.
    pub peak_live: usize,
}

/// Starts and stops sessions against one engine.
pub struct SessionManager {
    engine: Arc<dyn DesktopEngine>,
    registry: PortRegistry,
    bases: PortBases,
    policy: ConflictPolicy,
    lifecycle_timeout: Option<Duration>,
    stats: Mutex<PoolStats>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn DesktopEngine>, bases: PortBases, policy: ConflictPolicy) -> Self {
        Self {
            engine,
            registry: PortRegistry::new(),
            bases,
            policy,
            lifecycle_timeout: None,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Limit on each provision and teardown call; `None` waits forever.
    pub fn with_lifecycle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lifecycle_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats_lock()
    }

    fn stats_lock(&self) -> MutexGuard<'_, PoolStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve ports and provision the desktop.
    pub async fn start(&self, session: &mut Session) -> Result<(), SessionError> {
        if session.status != SessionStatus::NotStarted {
            return Err(SessionError::AlreadyStarted(session.name.clone()));
        }

        let reservation = self.reserve(session)?;

        let config = SessionConfig {
            name: session.name.clone(),
            ports: session.assignment,
            task_index: session.index,
            params: session.params.clone(),
        };

        let provision = self.engine.provision(&config);
        let provisioned = match self.lifecycle_timeout {
            Some(limit) => match tokio::time::timeout(limit, provision).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("provision exceeded {:.1}s", limit.as_secs_f64())),
            },
            None => provision.await.map_err(|e| e.to_string()),
        };

        let handle = match provisioned {
            Ok(handle) => handle,
            Err(reason) => {
                warn!(session = %session.name, error = %reason, "Failed to provision desktop");
                // reservation dropped here, releasing the ports
                return Err(SessionError::StartFailure {
                    name: session.name.clone(),
                    reason,
                });
            }
        };

        info!(
            session = %session.name,
            handle = %handle.id,
            ports = %session.assignment,
            "Session started"
        );

        session.handle = Some(handle);
        session.reservation = Some(reservation);
        session.status = SessionStatus::Running;

        let mut stats = self.stats_lock();
        stats.started += 1;
        stats.live += 1;
        stats.peak_live = stats.peak_live.max(stats.live);

        Ok(())
    }

    fn reserve(&self, session: &mut Session) -> Result<PortReservation, SessionError> {
        let mut shift = 0;
        loop {
            match self.registry.reserve(&session.assignment, &session.name) {
                Ok(reservation) => return Ok(reservation),
                Err((port, holder)) => {
                    let can_shift = match self.policy {
                        ConflictPolicy::Fail => false,
                        ConflictPolicy::NextFree { max_attempts } => shift < max_attempts,
                    };
                    if !can_shift {
                        warn!(session = %session.name, port, holder = %holder, "Port conflict");
                        return Err(SessionError::ResourceConflict {
                            name: session.name.clone(),
                            port,
                            holder,
                        });
                    }

                    shift += 1;
                    session.assignment = self
                        .bases
                        .allocate_shifted(session.index, shift)
                        .map_err(|source| SessionError::Allocation {
                            name: session.name.clone(),
                            source,
                        })?;
                    debug!(
                        session = %session.name,
                        busy_port = port,
                        shift,
                        "Port busy, trying next slot"
                    );
                }
            }
        }
    }

    /// Tear the desktop down and release its ports.
    ///
    /// A no-op for sessions that are not running. Teardown errors and
    /// timeouts are logged; the session is marked stopped either way.
    pub async fn stop(&self, session: &mut Session) {
        if session.status != SessionStatus::Running {
            debug!(session = %session.name, status = ?session.status, "Stop is a no-op");
            return;
        }

        // Stats first: teardown may panic
        session.status = SessionStatus::Stopped;
        {
            let mut stats = self.stats_lock();
            stats.stopped += 1;
            stats.live = stats.live.saturating_sub(1);
        }

        if let Some(handle) = session.handle.take() {
            let teardown = self.engine.teardown(&handle);
            let result = match self.lifecycle_timeout {
                Some(limit) => match tokio::time::timeout(limit, teardown).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            session = %session.name,
                            timeout_secs = limit.as_secs_f64(),
                            "Teardown timed out"
                        );
                        session.reservation = None;
                        return;
                    }
                },
                None => teardown.await,
            };
            match result {
                Ok(()) => info!(session = %session.name, "Session stopped"),
                Err(e) => warn!(session = %session.name, error = %e, "Teardown failed"),
            }
        }

        session.reservation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrun_agent::{Script, ScriptedEngine};

    fn manager(engine: Arc<ScriptedEngine>, policy: ConflictPolicy) -> SessionManager {
        SessionManager::new(engine, PortBases::default(), policy)
    }

    fn session(name: &str, index: u32) -> Session {
        Session::new(name, index, PortBases::default().allocate(index).unwrap())
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::Fail);

        let mut s = session("desk_1", 1);
        sessions.start(&mut s).await.unwrap();
        assert_eq!(s.status(), SessionStatus::Running);
        assert!(s.handle().is_some());
        assert!(sessions.registry().is_held(5900));

        sessions.stop(&mut s).await;
        assert_eq!(s.status(), SessionStatus::Stopped);
        assert!(sessions.registry().is_empty());
        assert_eq!(engine.stats().teardowns, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::Fail);

        let mut never_started = session("desk_1", 1);
        sessions.stop(&mut never_started).await;
        assert_eq!(never_started.status(), SessionStatus::NotStarted);

        let mut s = session("desk_2", 2);
        sessions.start(&mut s).await.unwrap();
        sessions.stop(&mut s).await;
        sessions.stop(&mut s).await;

        assert_eq!(engine.stats().teardown_calls, 1);
        let stats = sessions.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.stopped, 1);
        assert_eq!(stats.live, 0);
    }

    #[tokio::test]
    async fn test_conflict_fails_under_fail_policy() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::Fail);

        let mut first = session("desk_a", 1);
        sessions.start(&mut first).await.unwrap();

        let mut second = session("desk_b", 1);
        let err = sessions.start(&mut second).await.unwrap_err();
        match &err {
            SessionError::ResourceConflict { port, holder, .. } => {
                assert_eq!(*port, 5900);
                assert_eq!(holder, "desk_a");
            }
            other => panic!("Expected ResourceConflict, got {:?}", other),
        }
        assert_eq!(err.to_failure().kind, deskrun_core::ErrorKind::ResourceConflict);
        assert_eq!(second.status(), SessionStatus::NotStarted);
        assert_eq!(engine.stats().provisions, 1);
    }

    #[tokio::test]
    async fn test_next_free_policy_shifts_assignment() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::NextFree { max_attempts: 2 });

        let mut first = session("desk_a", 1);
        sessions.start(&mut first).await.unwrap();

        let mut second = session("desk_b", 1);
        sessions.start(&mut second).await.unwrap();
        assert_eq!(second.assignment().vnc, 5901);
        assert_eq!(second.assignment().socat, 2829);
    }

    #[tokio::test]
    async fn test_next_free_policy_gives_up() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::NextFree { max_attempts: 1 });

        let mut a = session("desk_a", 1);
        let mut b = session("desk_b", 2);
        sessions.start(&mut a).await.unwrap();
        sessions.start(&mut b).await.unwrap();

        let mut c = session("desk_c", 1);
        let err = sessions.start(&mut c).await.unwrap_err();
        assert!(matches!(err, SessionError::ResourceConflict { .. }));
    }

    #[tokio::test]
    async fn test_provision_failure_releases_ports() {
        let engine = Arc::new(ScriptedEngine::new(Script::new().with_provision_failure(1)));
        let sessions = manager(engine.clone(), ConflictPolicy::Fail);

        let mut s = session("desk_1", 1);
        let err = sessions.start(&mut s).await.unwrap_err();
        assert!(matches!(err, SessionError::StartFailure { .. }));
        assert_eq!(err.to_failure().kind, deskrun_core::ErrorKind::StartFailure);
        assert!(sessions.registry().is_empty());
        assert_eq!(sessions.stats().live, 0);

        // never started, so stop stays a no-op
        sessions.stop(&mut s).await;
        assert_eq!(engine.stats().teardown_calls, 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let engine = Arc::new(ScriptedEngine::new(Script::new()));
        let sessions = manager(engine.clone(), ConflictPolicy::Fail);

        let mut s = session("desk_1", 1);
        sessions.start(&mut s).await.unwrap();
        assert!(matches!(
            sessions.start(&mut s).await,
            Err(SessionError::AlreadyStarted(_))
        ));
        sessions.stop(&mut s).await;
    }
}
