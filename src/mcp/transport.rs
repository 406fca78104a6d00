//! Line-delimited JSON-RPC over a server child's stdin/stdout.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TransportError;
use super::envelope::{Inbound, RpcRequest, decode_line};
use crate::process::CommandSpec;
use crate::process::signal::force_kill;

/// Lines of server stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 64;
/// How long `close` waits for the killed server to be reaped.
const CLOSE_REAP_GRACE: Duration = Duration::from_secs(5);

struct Session {
    child: Child,
    pid: Option<u32>,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    stderr_task: JoinHandle<()>,
}

/// Client side of one MCP server process.
///
/// Calls are serialized: the session lock is held for a whole
/// request/response exchange, and every request carries the same id.
pub struct McpTransport {
    name: String,
    call_timeout: Duration,
    session: Mutex<Option<Session>>,
    cancel: StdMutex<CancellationToken>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

impl std::fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTransport")
            .field("name", &self.name)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl McpTransport {
    pub fn new(name: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            call_timeout,
            session: Mutex::new(None),
            cancel: StdMutex::new(CancellationToken::new()),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Spawn the server described by `spec`.
    ///
    /// A no-op while a previously started server is still alive; a dead one
    /// is replaced.
    pub async fn start(&self, spec: &CommandSpec) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_mut() {
            if matches!(existing.child.try_wait(), Ok(None)) {
                return Ok(());
            }
            tracing::info!(server = %self.name, "MCP server exited; restarting");
            if let Some(old) = session.take() {
                old.stderr_task.abort();
            }
        }

        let mut command = spec.to_command();
        command.stdin(Stdio::piped()).kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            program: spec.program().to_string(),
            source,
        })?;

        let pid = child.id();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            force_kill(&mut child, pid);
            return Err(TransportError::Io(io::Error::other(
                "MCP server pipes were not captured",
            )));
        };

        let token = CancellationToken::new();
        self.replace_token(token.clone());
        let stderr_task = spawn_stderr_drain(
            self.name.clone(),
            stderr,
            Arc::clone(&self.stderr_tail),
            token,
        );

        tracing::info!(server = %self.name, ?pid, command = %spec.display(), "started MCP server");
        *session = Some(Session {
            child,
            pid,
            stdin,
            reader: BufReader::new(stdout),
            stderr_task,
        });
        Ok(())
    }

    /// Send one request and wait for its response.
    ///
    /// Notifications that arrive first are skipped. The call fails with
    /// `Timeout` once `call_timeout` elapses and with `Cancelled` if the
    /// transport is closed meanwhile; the session itself is left as is.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let cancel = self.current_token();
        // The token of a closed session stays cancelled until the next start.
        let mut guard = tokio::select! {
            biased;
            guard = self.session.lock() => guard,
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
        };
        let session = guard.as_mut().ok_or(TransportError::NotStarted)?;
        let line = RpcRequest::new(method, params).to_line()?;

        let exchange = exchange(&self.name, session, method, &line);
        tokio::select! {
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, exchange) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(server = %self.name, method, "MCP call timed out after {:?}", self.call_timeout);
                    Err(TransportError::Timeout {
                        method: method.to_string(),
                        after: self.call_timeout,
                    })
                }
            },
        }
    }

    /// Stop the server. Safe to call repeatedly or before `start`.
    pub async fn close(&self) {
        self.current_token().cancel();
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        drop(session.stdin);
        force_kill(&mut session.child, session.pid);
        if tokio::time::timeout(CLOSE_REAP_GRACE, session.child.wait())
            .await
            .is_err()
        {
            tracing::warn!(server = %self.name, pid = ?session.pid, "MCP server was not reaped within {CLOSE_REAP_GRACE:?}");
        }
        session.stderr_task.abort();
        tracing::info!(server = %self.name, pid = ?session.pid, "closed MCP server");
    }

    pub async fn is_running(&self) -> bool {
        match self.session.lock().await.as_mut() {
            Some(session) => matches!(session.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.session.lock().await.as_ref().and_then(|session| session.pid)
    }

    /// Whether the stderr drain of the current session is still reading.
    pub async fn stderr_drain_active(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| !session.stderr_task.is_finished())
    }

    /// The most recent server stderr lines, oldest first.
    pub fn recent_stderr(&self) -> Vec<String> {
        match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn current_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_token(&self, token: CancellationToken) {
        match self.cancel.lock() {
            Ok(mut current) => *current = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

async fn exchange(
    server: &str,
    session: &mut Session,
    method: &str,
    request: &str,
) -> Result<Value, TransportError> {
    if let Err(err) = write_request(&mut session.stdin, request).await {
        return Err(if err.kind() == io::ErrorKind::BrokenPipe {
            TransportError::Closed
        } else {
            TransportError::Io(err)
        });
    }

    let mut line = String::new();
    loop {
        line.clear();
        let bytes = session.reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Err(TransportError::Closed);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match decode_line(trimmed)? {
            Inbound::Result(value) => return Ok(value),
            Inbound::Error(error) => {
                return Err(TransportError::Rpc {
                    method: method.to_string(),
                    code: error.code,
                    message: error.message,
                    data: error.data,
                });
            }
            Inbound::Notification(notification) => {
                tracing::debug!(server = %server, notification = %notification, "skipping MCP notification");
            }
        }
    }
}

async fn write_request(stdin: &mut ChildStdin, request: &str) -> io::Result<()> {
    stdin.write_all(request.as_bytes()).await?;
    stdin.flush().await
}

/// Keep reading server stderr so a chatty server never blocks on a full pipe.
fn spawn_stderr_drain(
    server: String,
    stderr: ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    tracing::debug!(target: "toolbelt::mcp::stderr", server = %server, "{line}");
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                Err(err) => {
                    tracing::debug!(server = %server, "MCP stderr drain stopped: {err}");
                    break;
                }
            }
        }
    })
}
