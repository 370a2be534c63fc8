//! Session registry.
//!
//! The map of session id to [`Session`] is the only globally shared mutable
//! structure in the gateway. The map lock is never held across an await;
//! waiting for a busy session happens on the session's own async slot.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::SessionError;
use super::types::{Session, SessionInfo, SessionState, SessionStats};

/// How an invocation ended, as far as the session is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn finished without error. The continuation, when present,
    /// replaces the session's previous one.
    Completed { continuation: Option<String> },
    /// The turn failed, timed out or was cancelled.
    Abandoned,
}

/// Exclusive hold on a session for the lifetime of one invocation.
///
/// Dropping the guard releases the session. Unless the turn was marked
/// completed through [`SessionRegistry::release`], the turn counter is left
/// untouched.
#[derive(Debug)]
pub struct SessionGuard {
    session: Session,
    outcome: TurnOutcome,
    _slot: OwnedMutexGuard<()>,
}

impl SessionGuard {
    /// The held session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut meta = self.session.meta();
        meta.busy = false;
        if let TurnOutcome::Completed { continuation } = &mut self.outcome {
            meta.turns = meta.turns.saturating_add(1);
            if let Some(token) = continuation.take() {
                meta.continuation = Some(token);
            }
        }
        meta.touch();
        if meta.state != SessionState::Terminated {
            meta.state = if meta.waiters > 0 {
                SessionState::Active
            } else {
                SessionState::Idle
            };
        }
        tracing::debug!(
            session_id = %self.session.id(),
            turns = meta.turns,
            state = ?meta.state,
            "Session released"
        );
    }
}

/// Decrements the waiter count even if the acquiring future is dropped.
struct WaiterGuard<'a>(&'a Session);

impl<'a> WaiterGuard<'a> {
    fn enter(session: &'a Session) -> Self {
        let mut meta = session.meta();
        meta.waiters += 1;
        if meta.state == SessionState::Idle {
            meta.state = SessionState::Active;
        }
        drop(meta);
        Self(session)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut meta = self.0.meta();
        meta.waiters = meta.waiters.saturating_sub(1);
        if meta.waiters == 0 && !meta.busy && meta.state == SessionState::Active {
            meta.state = SessionState::Idle;
        }
    }
}

/// Registry of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    project_root: PathBuf,
}

impl SessionRegistry {
    /// Create an empty registry. Sessions created without a working
    /// directory hint are rooted at `project_root/<session id>`.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            project_root: project_root.into(),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Root for sessions created without a directory hint.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Return the session for `id`, creating it if unknown.
    ///
    /// A known session keeps the directory it was created with; asking for a
    /// different one is a conflict. Omitting the directory never conflicts.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Conflict` on a working directory mismatch and
    /// `SessionError::InvalidId` when a new session without a directory hint
    /// has an id that is not a single plain path component.
    pub fn resolve_or_create(
        &self,
        id: &str,
        working_dir: Option<&Path>,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.map();

        if let Some(existing) = sessions.get(id) {
            if let Some(requested) = working_dir {
                if requested != existing.working_dir() {
                    tracing::warn!(
                        session_id = %id,
                        bound = %existing.working_dir().display(),
                        requested = %requested.display(),
                        "Session working directory conflict"
                    );
                    return Err(SessionError::Conflict {
                        id: id.to_string(),
                        bound: existing.working_dir().to_path_buf(),
                        requested: requested.to_path_buf(),
                    });
                }
            }
            existing.meta().touch();
            return Ok(existing.clone());
        }

        let dir = match working_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.default_dir(id)?,
        };
        let session = Session::new(id, dir);
        sessions.insert(id.to_string(), session.clone());
        tracing::info!(
            session_id = %id,
            working_dir = %session.working_dir().display(),
            total = sessions.len(),
            "Session created"
        );
        Ok(session)
    }

    fn default_dir(&self, id: &str) -> Result<PathBuf, SessionError> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.project_root.join(name)),
            _ => Err(SessionError::InvalidId(id.to_string())),
        }
    }

    /// Wait up to `wait` for exclusive use of `session`.
    ///
    /// Callers queue in FIFO order on the session's slot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Busy` if the wait elapses and
    /// `SessionError::Terminated` if the session is terminated before or
    /// while waiting.
    pub async fn acquire(
        &self,
        session: &Session,
        wait: Duration,
    ) -> Result<SessionGuard, SessionError> {
        if session.is_terminated() {
            return Err(SessionError::Terminated(session.id().to_string()));
        }

        let waiter = WaiterGuard::enter(session);
        let slot = Arc::clone(&session.inner.slot);
        let cancel = session.cancellation_token();

        let acquired = tokio::select! {
            biased;

            () = cancel.cancelled() => None,
            locked = tokio::time::timeout(wait, slot.lock_owned()) => match locked {
                Ok(guard) => Some(guard),
                Err(_) => {
                    tracing::debug!(session_id = %session.id(), ?wait, "Session acquire timed out");
                    return Err(SessionError::Busy {
                        id: session.id().to_string(),
                        waited: wait,
                    });
                }
            },
        };

        let Some(slot_guard) = acquired else {
            return Err(SessionError::Terminated(session.id().to_string()));
        };

        let mut meta = session.meta();
        if meta.state == SessionState::Terminated {
            return Err(SessionError::Terminated(session.id().to_string()));
        }
        meta.busy = true;
        meta.state = SessionState::Active;
        meta.touch();
        drop(meta);
        drop(waiter);

        tracing::debug!(session_id = %session.id(), "Session acquired");
        Ok(SessionGuard {
            session: session.clone(),
            outcome: TurnOutcome::Abandoned,
            _slot: slot_guard,
        })
    }

    /// Release a session held by `guard`, recording how the turn ended.
    pub fn release(&self, mut guard: SessionGuard, outcome: TurnOutcome) {
        guard.outcome = outcome;
        drop(guard);
    }

    /// Remove sessions idle for longer than `threshold`.
    ///
    /// Busy sessions and sessions with queued callers are never evicted.
    /// Returns the evicted ids.
    pub fn evict_idle(&self, threshold: Duration) -> Vec<String> {
        let mut sessions = self.map();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| {
                let meta = session.meta();
                meta.is_evictable() && meta.idle_for() > threshold
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.mark_terminated();
                tracing::info!(session_id = %id, "Session expired and evicted");
            }
        }
        expired
    }

    /// Terminate a session, cancelling any invocation running on it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if no such session is registered.
    pub fn terminate(&self, id: &str) -> Result<SessionInfo, SessionError> {
        let session = self
            .map()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let was_busy = session.is_busy();
        session.mark_terminated();
        tracing::info!(session_id = %id, was_busy, "Session terminated");
        Ok(session.info())
    }

    /// Look up a session without touching it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.map().get(id).cloned()
    }

    /// Snapshots of all sessions.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.map().values().map(Session::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Totals across every registered session.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.map()
            .values()
            .map(Session::info)
            .fold(SessionStats::default(), |mut stats, info| {
                stats.add(&info);
                stats
            })
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Number of sessions in the Active state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.map()
            .values()
            .filter(|session| session.state() == SessionState::Active)
            .count()
    }

    /// Spawn the periodic idle sweep.
    ///
    /// Runs `evict_idle(ttl)` every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = self.evict_idle(ttl);
                        if !evicted.is_empty() {
                            tracing::info!(count = evicted.len(), remaining = self.len(), "Evicted idle sessions");
                        }
                    }
                }
            }
        })
    }
}
