//! Process-wide per-facility session records.
//!
//! Records are keyed by facility name and stored whole: login assembles the
//! complete record before handing it over. When backed by a file, a new
//! record is written out before it becomes visible, so a failed write never
//! leaves a session that nobody was told about.

use crate::error::{ClientError, ClientResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use topcat_core::Session;

const EVENT_CAPACITY: usize = 64;

/// What changed about a facility's session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEventKind {
    LoggedIn,
    LoggedOut,
}

/// "Session changed" notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEvent {
    pub facility: String,
    pub kind: SessionEventKind,
}

/// Per-facility session records shared by every client.
pub struct SessionStore {
    sessions: RwLock<BTreeMap<String, Session>>,
    pending: Mutex<HashSet<String>>,
    lifecycles: Mutex<HashMap<String, Arc<tokio::sync::RwLock<()>>>>,
    path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionStore {
    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::with_sessions(BTreeMap::new(), None)
    }

    /// A store persisted to `path`, loading any sessions already there.
    pub async fn open(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let sessions = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                ClientError::SessionStore(format!("{}: {e}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(ClientError::SessionStore(format!(
                    "{}: {err}",
                    path.display()
                )));
            }
        };
        tracing::debug!(path = %path.display(), count = sessions.len(), "Loaded sessions");
        Ok(Self::with_sessions(sessions, Some(path)))
    }

    fn with_sessions(sessions: BTreeMap<String, Session>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: RwLock::new(sessions),
            pending: Mutex::new(HashSet::new()),
            lifecycles: Mutex::new(HashMap::new()),
            path,
            write_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            tracing::warn!("session store RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::warn!("session store RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a facility's session.
    pub fn get(&self, facility: &str) -> Option<Session> {
        self.read().get(facility).cloned()
    }

    pub fn session_id(&self, facility: &str) -> Option<String> {
        self.read().get(facility).map(|s| s.session_id.clone())
    }

    /// Facilities with an established session.
    pub fn facilities(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Lock serializing a facility's session lifecycle.
    ///
    /// Login and logout hold it exclusively; requests that use the session
    /// hold it shared, so no request ever runs with a session id that a
    /// concurrent logout is tearing down.
    pub fn lifecycle(&self, facility: &str) -> Arc<tokio::sync::RwLock<()>> {
        let mut lifecycles = self
            .lifecycles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(lifecycles.entry(facility.to_string()).or_default())
    }

    /// Mark a login as in progress.
    pub fn begin_login(&self, facility: &str) {
        self.pending().insert(facility.to_string());
    }

    pub fn end_login(&self, facility: &str) {
        self.pending().remove(facility);
    }

    pub fn is_pending(&self, facility: &str) -> bool {
        self.pending().contains(facility)
    }

    /// Store a complete session record, replacing any previous one.
    ///
    /// The record is persisted first; on failure the store is unchanged.
    pub async fn establish(&self, facility: &str, session: Session) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.read().clone();
        next.insert(facility.to_string(), session);
        self.persist(&next).await?;
        *self.write() = next;
        Ok(())
    }

    /// Remove a facility's session, returning it.
    ///
    /// The record is dropped locally even if the file cannot be rewritten.
    pub async fn remove(&self, facility: &str) -> ClientResult<Option<Session>> {
        let _guard = self.write_lock.lock().await;
        let removed = self.write().remove(facility);
        if removed.is_some() {
            let snapshot = self.read().clone();
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }

    /// Subscribe to "session changed" notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Broadcast a "session changed" notification. Having no listeners is fine.
    pub fn notify(&self, facility: &str, kind: SessionEventKind) {
        let delivered = self
            .events
            .send(SessionEvent {
                facility: facility.to_string(),
                kind,
            })
            .unwrap_or(0);
        tracing::debug!(facility, ?kind, listeners = delivered, "session changed");
    }

    /// Write `sessions` to the backing file. Callers hold `write_lock`.
    async fn persist(&self, sessions: &BTreeMap<String, Session>) -> ClientResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(sessions)?;

        let io_err = |e: std::io::Error| ClientError::SessionStore(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        tokio::fs::write(path, contents).await.map_err(io_err)?;

        // Session ids are credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(path, perms)
                .await
                .map_err(io_err)?;
        }

        Ok(())
    }
}
