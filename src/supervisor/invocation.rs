//! A single running invocation and the task that drives it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cli::{ClaudeProcess, OutputParser};
use crate::event::{ErrorKind, StreamEvent};
use crate::session::{SessionGuard, SessionRegistry, TurnOutcome};

/// Default buffer size for the per-invocation event channel.
pub const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// Number of stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Handle to one running invocation.
///
/// Yields the invocation's [`StreamEvent`]s in order and ends after the
/// terminal event. Dropping the handle cancels the invocation.
#[derive(Debug)]
pub struct Invocation {
    id: String,
    session_id: String,
    model: String,
    cancel: CancellationToken,
    events: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl Invocation {
    pub(crate) fn new(
        id: String,
        session_id: String,
        model: String,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Sender<StreamEvent>) {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let invocation = Self {
            id,
            session_id,
            model,
            cancel,
            events: rx,
            finished: false,
        };
        (invocation, tx)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the session this invocation runs in.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request termination. The stream then ends with `Error(Cancelled)`
    /// unless a terminal event was already produced.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for Invocation {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(invocation_id = %self.id, "Invocation dropped before completion");
        }
        self.cancel.cancel();
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// A terminal event was delivered.
    Finished,
    /// Stdout closed without a terminal event.
    Eof,
    Cancelled,
    Deadline,
    Idle,
}

/// Owns the process, the session guard and the capacity permit of one
/// invocation. Every exit path reaps the process before releasing them.
pub(crate) struct InvocationDriver {
    pub(crate) invocation_id: String,
    pub(crate) process: ClaudeProcess,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: Option<ChildStderr>,
    pub(crate) tx: mpsc::Sender<StreamEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) deadline: Instant,
    pub(crate) idle_timeout: Duration,
    pub(crate) terminate_grace: Duration,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) guard: SessionGuard,
    pub(crate) permit: OwnedSemaphorePermit,
}

impl InvocationDriver {
    pub(crate) async fn run(self) {
        let Self {
            invocation_id,
            mut process,
            stdout,
            stderr,
            tx,
            cancel,
            deadline,
            idle_timeout,
            terminate_grace,
            registry,
            guard,
            permit,
        } = self;

        let started = Instant::now();
        let session_id = guard.session().id().to_string();
        let stderr_tail = stderr.map(collect_tail);
        let sender = EventSender {
            tx,
            cancel: &cancel,
            deadline,
        };
        let mut parser = OutputParser::new();
        let mut lines = BufReader::new(stdout).split(b'\n');
        let mut completed = false;
        let mut usage = None;

        let exit = 'read: loop {
            let line = tokio::select! {
                biased;

                () = cancel.cancelled() => break 'read Exit::Cancelled,
                () = tokio::time::sleep_until(deadline) => break 'read Exit::Deadline,
                line = tokio::time::timeout(idle_timeout, lines.next_segment()) => line,
            };

            let mut line = match line {
                Err(_) => break Exit::Idle,
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break Exit::Eof,
                Ok(Err(e)) => {
                    tracing::warn!(%invocation_id, error = %e, "Failed to read Claude output");
                    break Exit::Eof;
                }
            };

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            tracing::trace!(%invocation_id, line = %String::from_utf8_lossy(&line), "Output line");
            for event in parser.parse_bytes(&line) {
                if let StreamEvent::Usage(reported) = &event {
                    usage = Some(*reported);
                }
                let terminal = event.is_terminal();
                let done = matches!(event, StreamEvent::Done { .. });
                if let Err(exit) = sender.send(event).await {
                    break 'read exit;
                }
                completed |= done;
                if terminal {
                    break 'read Exit::Finished;
                }
            }
        };
        drop(lines);

        let status = match exit {
            Exit::Finished | Exit::Eof => {
                wait_or_terminate(&mut process, terminate_grace, &invocation_id).await
            }
            Exit::Cancelled | Exit::Deadline | Exit::Idle => {
                if let Err(e) = process.graceful_terminate(terminate_grace).await {
                    tracing::error!(%invocation_id, error = %e, "Failed to terminate Claude process");
                }
                None
            }
        };
        // Tool subprocesses must not outlive the invocation.
        process.kill_group();
        let exit_code = status.and_then(|s| s.code());
        let stderr_tail = match stderr_tail {
            Some(handle) => join_tail(handle, terminate_grace).await,
            None => String::new(),
        };

        match exit {
            Exit::Finished => {
                if status.is_some_and(|s| !s.success()) {
                    tracing::warn!(
                        %invocation_id,
                        ?exit_code,
                        "Claude process exited unsuccessfully after its result; ignoring"
                    );
                }
            }
            Exit::Eof => {
                if status.is_some_and(|s| s.success()) {
                    if sender.send(StreamEvent::done()).await.is_ok() {
                        completed = true;
                    }
                } else {
                    tracing::warn!(%invocation_id, ?exit_code, stderr = %stderr_tail, "Claude process failed");
                    let event = StreamEvent::error(
                        ErrorKind::ProcessFailed { exit_code },
                        failure_message(exit_code, &stderr_tail),
                    );
                    if let Err(exit) = sender.send(event).await {
                        tracing::debug!(%invocation_id, ?exit, "Failure not delivered");
                    }
                }
            }
            Exit::Cancelled => {
                tracing::info!(%invocation_id, "Invocation cancelled");
                sender
                    .send_final(
                        StreamEvent::error(ErrorKind::Cancelled, "Invocation cancelled"),
                        terminate_grace,
                    )
                    .await;
            }
            Exit::Deadline => {
                tracing::warn!(%invocation_id, "Invocation deadline elapsed");
                sender
                    .send_final(
                        StreamEvent::error(ErrorKind::Timeout, "Invocation deadline elapsed"),
                        terminate_grace,
                    )
                    .await;
            }
            Exit::Idle => {
                tracing::warn!(%invocation_id, ?idle_timeout, "No output from Claude process");
                sender
                    .send_final(
                        StreamEvent::error(
                            ErrorKind::Timeout,
                            format!("No output for {} seconds", idle_timeout.as_secs()),
                        ),
                        terminate_grace,
                    )
                    .await;
            }
        }

        let outcome = if completed {
            TurnOutcome::Completed {
                continuation: parser.session_id().map(String::from),
            }
        } else {
            TurnOutcome::Abandoned
        };
        guard.session().record_usage(usage, parser.cost_usd());
        registry.release(guard, outcome);
        drop(permit);

        tracing::info!(
            %invocation_id,
            %session_id,
            ?exit,
            ?exit_code,
            completed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Invocation finished"
        );
    }
}

/// Delivers events to the [`Invocation`] while honouring cancellation and
/// the deadline.
struct EventSender<'a> {
    tx: mpsc::Sender<StreamEvent>,
    cancel: &'a CancellationToken,
    deadline: Instant,
}

impl EventSender<'_> {
    async fn send(&self, event: StreamEvent) -> Result<(), Exit> {
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Err(Exit::Cancelled),
            () = tokio::time::sleep_until(self.deadline) => Err(Exit::Deadline),
            sent = self.tx.send(event) => sent.map_err(|_| Exit::Cancelled),
        }
    }

    /// Best-effort delivery of a synthetic terminal event after the process
    /// is gone. Nobody may be listening any more.
    async fn send_final(&self, event: StreamEvent, wait: Duration) {
        if let Ok(Err(_)) | Err(_) = tokio::time::timeout(wait, self.tx.send(event)).await {
            tracing::debug!("Terminal event not delivered; receiver gone");
        }
    }
}

/// Wait for a process whose output has ended, terminating it if it lingers.
async fn wait_or_terminate(
    process: &mut ClaudeProcess,
    grace: Duration,
    invocation_id: &str,
) -> Option<std::process::ExitStatus> {
    match tokio::time::timeout(grace, process.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::error!(%invocation_id, error = %e, "Failed to wait for Claude process");
            None
        }
        Err(_) => {
            tracing::warn!(%invocation_id, "Claude process did not exit after closing its output");
            if let Err(e) = process.graceful_terminate(grace).await {
                tracing::error!(%invocation_id, error = %e, "Failed to terminate Claude process");
            }
            None
        }
    }
}

fn collect_tail<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).split(b'\n');
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        while let Ok(Some(line)) = lines.next_segment().await {
            let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            tracing::debug!(%line, "Claude stderr");
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

async fn join_tail(mut handle: JoinHandle<String>, wait: Duration) -> String {
    match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A grandchild may still hold the pipe open.
            handle.abort();
            String::new()
        }
    }
}

fn failure_message(exit_code: Option<i32>, stderr_tail: &str) -> String {
    let mut message = match exit_code {
        Some(code) => format!("Claude process exited with code {code}"),
        None => "Claude process was terminated by a signal".to_string(),
    };
    let tail = stderr_tail.trim();
    if !tail.is_empty() {
        message.push_str(": ");
        message.push_str(tail);
    }
    message
}
