//! Stub Claude executables for integration tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use claude_code_gateway::session::{Session, SessionRegistry};
use claude_code_gateway::supervisor::{ProcessSupervisor, SupervisorOptions};
use tempfile::TempDir;

/// Answers `--version` so health checks pass.
const VERSION_PREAMBLE: &str = r#"if [ "$1" = "--version" ]; then echo "1.0.0 (Claude Code)"; exit 0; fi"#;

/// Records the arguments of each run in `args.txt` in the working directory.
const RECORD_ARGS: &str = r#"printf '%s\n' "$@" > args.txt"#;

/// Streams "Hi" and " there!" then reports success.
pub const HI_THERE: &str = r##"
printf '%s\n' '{"type":"system","subtype":"init","session_id":"claude-abc","model":"claude-3-5-haiku-20241022"}'
printf '%s\n' '{"type":"stream_event","event":{"type":"message_start","message":{"id":"msg_1"}}}'
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}'
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there!"}}}'
printf '%s\n' '{"type":"assistant","message":{"id":"msg_1","content":[{"type":"text","text":"Hi there!"}]}}'
printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"result":"Hi there!","session_id":"claude-abc","total_cost_usd":0.01,"usage":{"input_tokens":5,"output_tokens":3}}'
"##;

/// Writes "boom" to stderr and exits 1 without output.
pub const EXIT_ONE: &str = r#"
echo "boom" >&2
exit 1
"#;

/// Never writes anything.
pub const SILENT: &str = "exec sleep 30";

/// Streams "Hi" and then hangs.
pub const HI_THEN_HANG: &str = r##"
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}'
exec sleep 30
"##;

/// One garbage line before a normal answer.
pub const GARBAGE_THEN_OK: &str = r##"
echo 'this is not json'
printf '%s\n' '{"type":"assistant","message":{"id":"msg_1","content":[{"type":"text","text":"ok"}]}}'
printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"session_id":"claude-xyz"}'
"##;

/// Reports an error result.
pub const UPSTREAM_ERROR: &str = r##"
printf '%s\n' '{"type":"result","subtype":"error_during_execution","is_error":true,"result":"API overloaded"}'
"##;

/// A line of bytes that are not UTF-8 between two text deltas.
pub const INVALID_UTF8: &str = r##"
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}'
printf '\377\376 not utf8\n'
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there!"}}}'
printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"session_id":"claude-utf"}'
"##;

/// Ignores SIGTERM, records its pid in `child.pid`, streams "Hi" and loops.
pub const IGNORES_TERM: &str = r##"
trap '' TERM
echo $$ > child.pid
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}'
while :; do sleep 1; done
"##;

/// Starts a background subprocess, records its pid in `grandchild.pid`,
/// streams "Hi" and hangs.
pub const SPAWNS_SUBPROCESS: &str = r##"
sleep 300 >/dev/null 2>&1 &
echo $! > grandchild.pid
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}'
exec sleep 30
"##;

/// Write an executable shell script named `claude` into `dir`.
pub fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    fs::write(
        &path,
        format!("#!/bin/sh\n{VERSION_PREAMBLE}\n{RECORD_ARGS}\n{body}\n"),
    )
    .unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Arguments the stub received on its last run in `session`'s directory.
pub fn recorded_args(session: &Session) -> Vec<String> {
    fs::read_to_string(session.working_dir().join("args.txt"))
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

/// Options tuned for fast tests.
pub fn test_options(binary: PathBuf) -> SupervisorOptions {
    SupervisorOptions {
        binary,
        queue_timeout: Duration::from_millis(200),
        session_wait: Duration::from_millis(200),
        invocation_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(5),
        terminate_grace: Duration::from_millis(500),
        ..SupervisorOptions::default()
    }
}

/// A temp dir holding the stub and the project root.
pub struct Harness {
    pub dir: TempDir,
    pub binary: PathBuf,
    pub registry: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(dir.path(), body);
        let registry = Arc::new(SessionRegistry::new(dir.path().join("projects")));
        Self {
            dir,
            binary,
            registry,
        }
    }

    pub fn supervisor(&self, tweak: impl FnOnce(&mut SupervisorOptions)) -> ProcessSupervisor {
        let mut options = test_options(self.binary.clone());
        tweak(&mut options);
        ProcessSupervisor::new(Arc::clone(&self.registry), options)
    }

    pub fn session(&self, id: &str) -> Session {
        self.registry.resolve_or_create(id, None).unwrap()
    }
}

/// Pid the stub wrote to `file` in `session`'s directory.
pub fn recorded_pid(session: &Session, file: &str) -> i32 {
    fs::read_to_string(session.working_dir().join(file))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

/// Whether `pid` names a live process. Zombies count as gone.
pub fn process_alive(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: "<pid> (<comm>) <state> ..."
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state != 'Z' && state != 'X')
}

/// Poll until `pid` is gone or `within` elapses. Returns true if it is gone.
pub async fn wait_gone(pid: i32, within: Duration) -> bool {
    tokio::time::timeout(within, async {
        while process_alive(pid) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

/// Wait until the invocation's driving task has released `session`.
pub async fn wait_released(session: &Session) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.is_busy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not released");
}
