//! Background processes tracked by pid.
//!
//! The registry only reaps on request: `status` observes exit and drops the
//! entry, `kill` signals and drops it. Nothing polls in the background, so a
//! process that exits unobserved keeps its entry until the next query.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;

use super::capture::{CaptureReaders, OutputCapture};
use super::command::CommandSpec;
use super::signal::{KillSignal, signal_child};
use super::{ProcessError, RunResult, RunStatus, elapsed_ms};

/// How long readers may drain after a tracked process exits.
const CAPTURE_DRAIN_GRACE: Duration = Duration::from_millis(500);
/// How long a terminated process gets before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

struct HandleState {
    child: Option<Child>,
    readers: Option<CaptureReaders>,
    exit: Option<ExitStatus>,
}

/// One live background process.
pub struct ProcessHandle {
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
    started: Instant,
    capture: OutputCapture,
    state: Mutex<HandleState>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Check the OS process without blocking; records the exit status the
    /// first time it is observed.
    fn poll_exit(&self) -> Result<bool, ProcessError> {
        let mut state = self.state.lock().map_err(|_| ProcessError::LockPoisoned)?;
        if state.exit.is_some() {
            return Ok(true);
        }
        let Some(child) = state.child.as_mut() else {
            return Ok(true);
        };
        match child.try_wait()? {
            Some(status) => {
                state.exit = Some(status);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.exit.and_then(|status| status.code()))
    }

    fn take_readers(&self) -> Option<CaptureReaders> {
        self.state.lock().ok().and_then(|mut state| state.readers.take())
    }

    fn take_child(&self) -> Option<Child> {
        self.state.lock().ok().and_then(|mut state| state.child.take())
    }

    fn snapshot(&self, status: RunStatus) -> RunResult {
        RunResult {
            stdout: self.capture.stdout_text(),
            stderr: self.capture.stderr_text(),
            pid: Some(self.pid),
            status,
            exit_code: self.exit_code(),
            duration_ms: Some(elapsed_ms(self.started)),
        }
    }

    fn summary(&self, status: RunStatus) -> ProcessSummary {
        ProcessSummary {
            pid: self.pid,
            command: self.command.clone(),
            started_at: self.started_at,
            status,
            stdout_len: self.capture.stdout_len(),
            stderr_len: self.capture.stderr_len(),
        }
    }
}

/// Listing entry for a tracked process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSummary {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub stdout_len: usize,
    pub stderr_len: usize,
}

/// Lock-guarded map from pid to background process.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: RwLock<HashMap<u32, Arc<ProcessHandle>>>,
}

/// Registry shared between tool instances that should see the same processes.
pub type SharedProcessRegistry = Arc<ProcessRegistry>;

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedProcessRegistry {
        Arc::new(Self::new())
    }

    /// Start `spec` without waiting and track it by pid.
    ///
    /// Must be called from within a Tokio runtime. Spawn failures return a
    /// `failed` result rather than an error.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<RunResult, ProcessError> {
        let started = Instant::now();
        let mut child = match spec.to_command().spawn() {
            Ok(child) => child,
            Err(err) => {
                let err = ProcessError::spawn(spec.program(), err);
                tracing::warn!(program = spec.program(), "{err}");
                return Ok(RunResult::spawn_failed(&err));
            }
        };

        let Some(pid) = child.id() else {
            // Already reaped before we could look; nothing to track.
            let err = ProcessError::spawn(
                spec.program(),
                std::io::Error::other("process exited before a pid was observed"),
            );
            return Ok(RunResult::spawn_failed(&err));
        };

        let capture = OutputCapture::new();
        let readers = capture.attach(&mut child);
        let handle = Arc::new(ProcessHandle {
            pid,
            command: spec.display(),
            started_at: Utc::now(),
            started,
            capture,
            state: Mutex::new(HandleState {
                child: Some(child),
                readers: Some(readers),
                exit: None,
            }),
        });

        if let Some(stale) = self.write()?.insert(pid, handle) {
            tracing::warn!(pid, stale = stale.command(), "replaced stale registry entry for reused pid");
        }
        tracing::info!(pid, command = %spec.display(), "spawned background process");

        Ok(RunResult {
            stdout: String::new(),
            stderr: String::new(),
            pid: Some(pid),
            status: RunStatus::Running,
            exit_code: None,
            duration_ms: Some(0),
        })
    }

    /// Report on a tracked process, reaping it if it has exited.
    pub async fn status(&self, pid: u32) -> Result<RunResult, ProcessError> {
        let Some(handle) = self.get(pid)? else {
            return Ok(RunResult::not_found(pid));
        };

        if !handle.poll_exit()? {
            return Ok(handle.snapshot(RunStatus::Running));
        }

        self.remove_entry(&handle)?;
        if let Some(readers) = handle.take_readers() {
            readers.finish(CAPTURE_DRAIN_GRACE).await;
        }
        tracing::info!(pid, exit_code = ?handle.exit_code(), "background process exited");
        Ok(handle.snapshot(RunStatus::Exited))
    }

    /// Send SIGTERM to a tracked process and stop tracking it.
    ///
    /// Safe on a process that already exited. A failed signal is an error and
    /// leaves the entry in place.
    pub async fn kill(&self, pid: u32) -> Result<RunResult, ProcessError> {
        let Some(handle) = self.get(pid)? else {
            return Ok(RunResult::not_found(pid));
        };

        if !handle.poll_exit()? {
            let mut state = handle.state.lock().map_err(|_| ProcessError::LockPoisoned)?;
            if let Some(child) = state.child.as_mut() {
                signal_child(child, pid, KillSignal::Term)
                    .map_err(|source| ProcessError::Signal { pid, source })?;
            }
        }

        self.remove_entry(&handle)?;
        tracing::info!(pid, "terminated background process");

        if let Some(mut child) = handle.take_child() {
            if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
                tracing::warn!(pid, "process ignored SIGTERM for {TERMINATE_GRACE:?}; killing");
                if let Err(err) = signal_child(&mut child, pid, KillSignal::Kill) {
                    tracing::warn!(pid, "SIGKILL failed: {err}");
                }
                let _ = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await;
            }
        }
        if let Some(readers) = handle.take_readers() {
            readers.finish(CAPTURE_DRAIN_GRACE).await;
        }

        Ok(handle.snapshot(RunStatus::Terminated))
    }

    /// Summaries of tracked processes; does not reap.
    pub fn list(&self) -> Result<Vec<ProcessSummary>, ProcessError> {
        let handles: Vec<Arc<ProcessHandle>> = self.read()?.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let status = if handle.poll_exit()? {
                RunStatus::Exited
            } else {
                RunStatus::Running
            };
            summaries.push(handle.summary(status));
        }
        summaries.sort_by_key(|summary| summary.pid);
        Ok(summaries)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.read().map(|map| map.contains_key(&pid)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminate every tracked process; used on shutdown.
    pub async fn terminate_all(&self) {
        let pids: Vec<u32> = match self.read() {
            Ok(map) => map.keys().copied().collect(),
            Err(_) => return,
        };
        for pid in pids {
            if let Err(err) = self.kill(pid).await {
                tracing::warn!(pid, "failed to terminate on shutdown: {err}");
            }
        }
    }

    fn get(&self, pid: u32) -> Result<Option<Arc<ProcessHandle>>, ProcessError> {
        Ok(self.read()?.get(&pid).cloned())
    }

    /// Remove `handle` only if it is still the entry for its pid.
    fn remove_entry(&self, handle: &Arc<ProcessHandle>) -> Result<(), ProcessError> {
        let mut map = self.write()?;
        if map
            .get(&handle.pid)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            map.remove(&handle.pid);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<u32, Arc<ProcessHandle>>>, ProcessError> {
        self.processes.read().map_err(|_| ProcessError::LockPoisoned)
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<u32, Arc<ProcessHandle>>>, ProcessError> {
        self.processes.write().map_err(|_| ProcessError::LockPoisoned)
    }
}
