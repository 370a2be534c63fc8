//! Gateway configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::DEFAULT_CLAUDE_BINARY;
use crate::supervisor::{SupervisorOptions, DEFAULT_MAX_CONCURRENT};

/// Complete gateway configuration, one field per TOML section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub process: ProcessConfig,
    pub limits: LimitsConfig,
    pub sessions: SessionsConfig,
}

/// `[server]`: HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow any origin.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_permissive: true,
        }
    }
}

/// `[process]`: how the Claude CLI is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
    /// Grace period between SIGTERM and SIGKILL.
    pub terminate_grace_ms: u64,
    pub skip_permissions: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CLAUDE_BINARY),
            extra_args: Vec::new(),
            terminate_grace_ms: 5_000,
            skip_permissions: true,
        }
    }
}

/// `[limits]`: concurrency and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_invocations: usize,
    pub queue_timeout_ms: u64,
    pub session_wait_ms: u64,
    pub invocation_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: DEFAULT_MAX_CONCURRENT,
            queue_timeout_ms: 30_000,
            session_wait_ms: 30_000,
            invocation_timeout_secs: 600,
            idle_timeout_secs: 120,
        }
    }
}

/// `[sessions]`: session directories and idle eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Parent of the working directories of sessions created without one.
    pub project_root: PathBuf,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub create_working_dirs: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        let project_root = dirs::data_local_dir().map_or_else(
            || PathBuf::from("projects"),
            |dir| dir.join("claude-code-gateway").join("projects"),
        );
        Self {
            project_root,
            idle_ttl_secs: 3_600,
            sweep_interval_secs: 60,
            create_working_dirs: true,
        }
    }
}

impl SessionsConfig {
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl GatewayConfig {
    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Supervisor settings derived from `[process]`, `[limits]` and
    /// `[sessions]`.
    #[must_use]
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            binary: self.process.binary.clone(),
            extra_args: self.process.extra_args.clone(),
            skip_permissions: self.process.skip_permissions,
            create_working_dirs: self.sessions.create_working_dirs,
            max_concurrent: self.limits.max_concurrent_invocations,
            queue_timeout: Duration::from_millis(self.limits.queue_timeout_ms),
            session_wait: Duration::from_millis(self.limits.session_wait_ms),
            invocation_timeout: Duration::from_secs(self.limits.invocation_timeout_secs),
            idle_timeout: Duration::from_secs(self.limits.idle_timeout_secs),
            terminate_grace: Duration::from_millis(self.process.terminate_grace_ms),
        }
    }

    /// Reject values the gateway cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.limits.max_concurrent_invocations == 0 {
            return Err("limits.max_concurrent_invocations must be at least 1".to_string());
        }
        if self.limits.invocation_timeout_secs == 0 {
            return Err("limits.invocation_timeout_secs must be positive".to_string());
        }
        if self.limits.idle_timeout_secs == 0 {
            return Err("limits.idle_timeout_secs must be positive".to_string());
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err("sessions.sweep_interval_secs must be positive".to_string());
        }
        if self.process.binary.as_os_str().is_empty() {
            return Err("process.binary must not be empty".to_string());
        }
        Ok(())
    }
}
