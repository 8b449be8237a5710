// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide registry of sensor sessions
//!
//! Every [`SensorSessionManager`](super::SensorSessionManager) registers
//! itself here and publishes its running and skeleton flags after each
//! reconciliation. The skeleton exclusivity rule queries the registry so at
//! most one skeleton engine runs per process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::debug;

/// Identifier of one registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Flags a session publishes about its attached sensor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEntry {
    pub sensor_id: Option<String>,
    pub running: bool,
    pub skeleton_enabled: bool,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

/// Shared session registry
///
/// Cloning yields another handle to the same registry. Use
/// [`SessionRegistry::global`] for the process-wide instance; tests create
/// isolated registries with [`SessionRegistry::new`].
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL_REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static SessionRegistry {
        GLOBAL_REGISTRY.get_or_init(SessionRegistry::new)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new session with empty flags
    pub fn register(&self) -> SessionId {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions().insert(id, SessionEntry::default());
        debug!(session = %id, "Session registered");
        id
    }

    pub fn unregister(&self, id: SessionId) {
        if self.sessions().remove(&id).is_some() {
            debug!(session = %id, "Session unregistered");
        }
    }

    /// Replace the published flags of a session
    pub fn publish(&self, id: SessionId, entry: SessionEntry) {
        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get_mut(&id) {
            *existing = entry;
        }
    }

    pub fn entry(&self, id: SessionId) -> Option<SessionEntry> {
        self.sessions().get(&id).cloned()
    }

    /// Snapshot of all sessions, ordered by id
    pub fn snapshot(&self) -> Vec<(SessionId, SessionEntry)> {
        let mut entries: Vec<_> = self
            .sessions()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// True if a session other than `except` runs a skeleton engine
    pub fn skeleton_engine_active_elsewhere(&self, except: SessionId) -> bool {
        self.sessions()
            .iter()
            .any(|(id, entry)| *id != except && entry.running && entry.skeleton_enabled)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions().len())
            .finish()
    }
}
