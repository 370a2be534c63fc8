//! Supervisor for launching Claude Code invocations.
//!
//! This module ties the process spawner, the output parser and the session
//! registry together. [`ProcessSupervisor::start`] acquires the session and a
//! global capacity permit, spawns the process in the session's working
//! directory and hands back an [`Invocation`] stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::cli::{claude_version, ClaudeProcess, ClaudeProcessBuilder, SpawnError, DEFAULT_CLAUDE_BINARY};
use crate::session::{Session, SessionError, SessionRegistry};
use crate::supervisor::invocation::{Invocation, InvocationDriver};

/// Default timeout for graceful process termination.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum number of concurrently running invocations.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The process could not be launched.
    #[error("Failed to spawn Claude process: {0}")]
    Spawn(#[from] SpawnError),
    /// The session could not be acquired.
    #[error(transparent)]
    Session(SessionError),
    /// No capacity permit became available within the queue timeout.
    #[error("Capacity exceeded: {limit} invocations already running")]
    CapacityExceeded { limit: usize },
    /// The session was terminated before the invocation could start.
    #[error("Session terminated: {0}")]
    SessionTerminated(String),
    /// Process stdout was not available.
    #[error("Process stdout not available")]
    NoStdout,
}

impl From<SessionError> for SupervisorError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Terminated(id) => Self::SessionTerminated(id),
            other => Self::Session(other),
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Path or name of the Claude Code executable.
    pub binary: PathBuf,
    /// Arguments appended to every command line.
    pub extra_args: Vec<String>,
    /// Pass `--dangerously-skip-permissions`.
    pub skip_permissions: bool,
    /// Create a session's working directory if it does not exist.
    pub create_working_dirs: bool,
    /// Global cap on running invocations.
    pub max_concurrent: usize,
    /// How long to queue for a capacity permit.
    pub queue_timeout: Duration,
    /// How long to wait for a busy session.
    pub session_wait: Duration,
    /// Absolute deadline for one invocation.
    pub invocation_timeout: Duration,
    /// Maximum silence between two output lines.
    pub idle_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CLAUDE_BINARY),
            extra_args: Vec::new(),
            skip_permissions: true,
            create_working_dirs: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_timeout: Duration::from_secs(30),
            session_wait: Duration::from_secs(30),
            invocation_timeout: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(120),
            terminate_grace: DEFAULT_TERMINATE_TIMEOUT,
        }
    }
}

/// What to run for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Model id passed to `--model`.
    pub model: String,
    /// Prompt for a fresh conversation.
    pub prompt: String,
    /// Prompt to send instead of `prompt` when the session can be resumed.
    pub resume_prompt: Option<String>,
    /// Value for `--system-prompt`.
    pub system_prompt: Option<String>,
}

impl InvocationRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            resume_prompt: None,
            system_prompt: None,
        }
    }
}

/// Launches and supervises Claude Code invocations.
#[derive(Debug)]
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    registry: Arc<SessionRegistry>,
    capacity: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ProcessSupervisor {
    /// Create a supervisor over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, options: SupervisorOptions) -> Self {
        let max_concurrent = options.max_concurrent.max(1);
        Self {
            capacity: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            registry,
            options,
        }
    }

    /// The session registry invocations are accounted against.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Number of invocations currently holding a capacity permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.capacity.available_permits())
    }

    /// Global cap on running invocations.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Version string reported by the configured binary.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the binary cannot be run.
    pub async fn version(&self) -> Result<String, SpawnError> {
        claude_version(&self.options.binary).await
    }

    /// Start one invocation on `session`.
    ///
    /// Waits for the session first, then for a capacity permit. Both are
    /// handed to the invocation's driving task, which releases them when the
    /// process has been reaped.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Session` if the session stays busy,
    /// `SupervisorError::SessionTerminated` if it was terminated,
    /// `SupervisorError::CapacityExceeded` if no permit frees up in time and
    /// `SupervisorError::Spawn` if the process cannot be launched.
    pub async fn start(
        &self,
        session: &Session,
        request: InvocationRequest,
    ) -> Result<Invocation, SupervisorError> {
        let guard = self
            .registry
            .acquire(session, self.options.session_wait)
            .await?;

        let permit = match tokio::time::timeout(
            self.options.queue_timeout,
            Arc::clone(&self.capacity).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    session_id = %session.id(),
                    limit = self.max_concurrent,
                    "No capacity for invocation"
                );
                return Err(SupervisorError::CapacityExceeded {
                    limit: self.max_concurrent,
                });
            }
        };

        let working_dir = session.working_dir();
        self.prepare_working_dir(working_dir).await?;

        // Resuming only makes sense when the caller supplied a prompt for it.
        let resume = session.continuation().zip(request.resume_prompt.clone());
        let prompt = match &resume {
            Some((_, prompt)) => prompt.clone(),
            None => request.prompt.clone(),
        };
        let mut builder = ClaudeProcessBuilder::new(prompt)
            .model(&request.model)
            .skip_permissions(self.options.skip_permissions)
            .extra_args(self.options.extra_args.iter().cloned())
            .working_dir(working_dir);
        if let Some(system_prompt) = &request.system_prompt {
            builder = builder.system_prompt(system_prompt);
        }
        if let Some((token, _)) = &resume {
            builder = builder.resume(token);
        }

        let mut process = ClaudeProcess::spawn_with_binary(&self.options.binary, &builder)
            .inspect_err(|e| {
                tracing::error!(session_id = %session.id(), error = %e, "Failed to spawn Claude process");
            })?;
        let stdout = process.take_stdout().ok_or(SupervisorError::NoStdout)?;
        let stderr = process.take_stderr();

        let invocation_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            invocation_id = %invocation_id,
            session_id = %session.id(),
            model = %request.model,
            pid = process.id(),
            resumed = resume.is_some(),
            "Invocation started"
        );

        let cancel = session.cancellation_token().child_token();
        let deadline = tokio::time::Instant::now() + self.options.invocation_timeout;
        let (invocation, tx) = Invocation::new(
            invocation_id.clone(),
            session.id().to_string(),
            request.model,
            cancel.clone(),
        );

        let driver = InvocationDriver {
            invocation_id,
            process,
            stdout,
            stderr,
            tx,
            cancel,
            deadline,
            idle_timeout: self.options.idle_timeout,
            terminate_grace: self.options.terminate_grace,
            registry: Arc::clone(&self.registry),
            guard,
            permit,
        };
        tokio::spawn(driver.run());

        Ok(invocation)
    }

    async fn prepare_working_dir(&self, dir: &Path) -> Result<(), SpawnError> {
        if self.options.create_working_dirs {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SpawnError::WorkingDir {
                    path: dir.to_path_buf(),
                    source,
                })
        } else if dir.is_dir() {
            Ok(())
        } else {
            Err(SpawnError::WorkingDir {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            })
        }
    }
}
