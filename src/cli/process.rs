//! Claude Code process spawning and control.
//!
//! This module provides a builder for the command line of one
//! non-interactive Claude Code run, and a handle for the running process
//! with graceful termination. On Unix the process leads its own process
//! group, so termination also reaches the tools it spawned.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Default name of the Claude Code executable.
pub const DEFAULT_CLAUDE_BINARY: &str = "claude";

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied executing {}", .0.display())]
    PermissionDenied(PathBuf),
    /// The working directory could not be prepared.
    #[error("Working directory {} unavailable: {source}", .path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(binary: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Builder for configuring Claude Code process arguments.
#[derive(Debug, Clone, Default)]
pub struct ClaudeProcessBuilder {
    prompt: String,
    model: Option<String>,
    system_prompt: Option<String>,
    resume_session: Option<String>,
    skip_permissions: bool,
    extra_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ClaudeProcessBuilder {
    /// Create a new builder with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            skip_permissions: true,
            ..Default::default()
        }
    }

    /// Select the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set a custom system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Resume an existing Claude session.
    #[must_use]
    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session = Some(session_id.into());
        self
    }

    /// Pass `--dangerously-skip-permissions` (on by default).
    #[must_use]
    pub fn skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    /// Append arbitrary arguments after the generated ones.
    #[must_use]
    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the Claude process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.prompt.clone()];

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(prompt) = &self.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(prompt.clone());
        }

        if let Some(session_id) = &self.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }

        args.extend(
            [
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
            ]
            .map(String::from),
        );

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Run `<binary> --version` and return its trimmed stdout.
///
/// # Errors
///
/// Returns `SpawnError` if the binary cannot be run or exits unsuccessfully.
pub async fn claude_version(binary: impl AsRef<Path>) -> Result<String, SpawnError> {
    let binary = binary.as_ref();
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SpawnError::from_io(binary, e))?;

    if !output.status.success() {
        return Err(SpawnError::Io(std::io::Error::other(format!(
            "{} --version exited with {}",
            binary.display(),
            output.status
        ))));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
    /// Process group led by the child, fixed at spawn.
    pgid: Option<u32>,
}

impl ClaudeProcess {
    /// Spawn a process using the given binary.
    ///
    /// The child has stdin closed, stdout and stderr piped, and is killed if
    /// the handle is dropped while it is still running.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_binary(
        binary: impl AsRef<Path>,
        builder: &ClaudeProcessBuilder,
    ) -> Result<Self, SpawnError> {
        let binary = binary.as_ref();
        let args: Vec<OsString> = builder.build_args().into_iter().map(OsString::from).collect();

        let mut cmd = Command::new(binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(ref dir) = builder.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| SpawnError::from_io(binary, e))?;
        let pgid = child.id();

        Ok(Self { child, pgid })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process and reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// SIGKILL whatever is left of the process group.
    ///
    /// Reaches subprocesses that outlived the Claude process itself. A group
    /// that is already gone is not an error. No-op on other platforms.
    pub fn kill_group(&self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid.and_then(|id| i32::try_from(id).ok()) else {
            return false;
        };
        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(errno) => {
                tracing::debug!(pgid, %errno, ?signal, "Failed to signal process group");
                false
            }
        }
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM to the whole process group first, then SIGKILL
    /// after the timeout. Group members that outlive the Claude process are
    /// killed as well. On other platforms, falls back to immediate kill. The
    /// process is reaped before this returns successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::Signal;

        let result = if let Some(pid) = self.id() {
            if self.signal_group(Signal::SIGTERM) {
                match tokio::time::timeout(timeout, self.child.wait()).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        tracing::debug!(pid, "Grace period elapsed, sending SIGKILL");
                        self.signal_group(Signal::SIGKILL);
                        self.child.kill().await
                    }
                }
            } else {
                tracing::debug!(pid, "SIGTERM to process group failed, killing");
                self.child.kill().await
            }
        } else {
            // Already exited; wait() reaps it if nobody has yet.
            self.child.wait().await.map(|_| ())
        };

        self.signal_group(Signal::SIGKILL);
        result
    }
}
