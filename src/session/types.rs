//! Session types.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::event::TokenUsage;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// An invocation holds the session or callers are queued for it.
    Active,
    /// Nobody holds or waits for the session.
    #[default]
    Idle,
    /// Terminated or evicted; no further invocations.
    Terminated,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Caller-supplied session identifier.
    pub id: String,
    /// Directory every invocation of this session runs in.
    pub working_dir: PathBuf,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last time the session was resolved, acquired or released.
    pub last_activity: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Completed turns.
    pub turns: u64,
    /// Claude session id to resume on the next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    /// Tokens reported across all turns.
    #[serde(default)]
    pub total_tokens: u64,
    /// Cost reported across all turns, in USD.
    #[serde(default)]
    pub total_cost_usd: f64,
}

/// Aggregate over every registered session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_turns: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

impl SessionStats {
    pub(crate) fn add(&mut self, info: &SessionInfo) {
        self.total_sessions += 1;
        if info.state == SessionState::Active {
            self.active_sessions += 1;
        }
        self.total_turns = self.total_turns.saturating_add(info.turns);
        self.total_tokens = self.total_tokens.saturating_add(info.total_tokens);
        self.total_cost_usd += info.total_cost_usd;
    }
}

#[derive(Debug)]
pub(crate) struct SessionMeta {
    pub(crate) state: SessionState,
    pub(crate) turns: u64,
    pub(crate) continuation: Option<String>,
    pub(crate) total_tokens: u64,
    pub(crate) total_cost_usd: f64,
    pub(crate) busy: bool,
    pub(crate) waiters: usize,
    last_touch: Instant,
    last_activity: DateTime<Utc>,
}

impl SessionMeta {
    pub(crate) fn touch(&mut self) {
        self.last_touch = Instant::now();
        self.last_activity = Utc::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_touch.elapsed()
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.state == SessionState::Idle && !self.busy && self.waiters == 0
    }
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) id: String,
    pub(crate) working_dir: PathBuf,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) meta: Mutex<SessionMeta>,
    pub(crate) slot: Arc<tokio::sync::Mutex<()>>,
    pub(crate) cancel: CancellationToken,
}

/// Shared handle to a registered session.
///
/// Cloning is cheap. All mutation goes through [`SessionRegistry`]
/// operations and [`SessionGuard`].
///
/// [`SessionRegistry`]: crate::session::SessionRegistry
/// [`SessionGuard`]: crate::session::SessionGuard
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(id: impl Into<String>, working_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                working_dir,
                created_at: now,
                meta: Mutex::new(SessionMeta {
                    state: SessionState::Idle,
                    turns: 0,
                    continuation: None,
                    total_tokens: 0,
                    total_cost_usd: 0.0,
                    busy: false,
                    waiters: 0,
                    last_touch: Instant::now(),
                    last_activity: now,
                }),
                slot: Arc::new(tokio::sync::Mutex::new(())),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, SessionMeta> {
        self.inner
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.meta().state
    }

    #[must_use]
    pub fn turns(&self) -> u64 {
        self.meta().turns
    }

    /// Claude session id recorded by the last completed turn.
    #[must_use]
    pub fn continuation(&self) -> Option<String> {
        self.meta().continuation.clone()
    }

    /// Tokens reported across all turns.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.meta().total_tokens
    }

    /// Cost reported across all turns, in USD.
    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.meta().total_cost_usd
    }

    /// Add one turn's reported usage. Failed turns count too; the tokens
    /// were spent either way.
    pub(crate) fn record_usage(&self, usage: Option<TokenUsage>, cost_usd: Option<f64>) {
        let mut meta = self.meta();
        if let Some(usage) = usage {
            meta.total_tokens = meta.total_tokens.saturating_add(usage.total());
        }
        if let Some(cost) = cost_usd {
            meta.total_cost_usd += cost;
        }
    }

    /// Returns true while an invocation holds the session.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.meta().busy
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled when the session is terminated.
    ///
    /// Invocations derive child tokens from it, so terminating the session
    /// stops whatever is running on it.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Snapshot of the session.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let meta = self.meta();
        SessionInfo {
            id: self.inner.id.clone(),
            working_dir: self.inner.working_dir.clone(),
            created_at: self.inner.created_at,
            last_activity: meta.last_activity,
            state: meta.state,
            turns: meta.turns,
            continuation: meta.continuation.clone(),
            total_tokens: meta.total_tokens,
            total_cost_usd: meta.total_cost_usd,
        }
    }

    pub(crate) fn mark_terminated(&self) {
        self.meta().state = SessionState::Terminated;
        self.inner.cancel.cancel();
    }
}
