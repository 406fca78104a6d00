//! Subprocess execution and supervision.
//!
//! Provides:
//! - `CommandSpec`: the immutable description of one invocation
//! - `ForegroundRunner`: run-to-completion with a deadline
//! - `ProcessRegistry`: background processes tracked by pid, with status/kill
//!
//! Every operation reports a `RunResult`; spawn failures and timeouts are
//! statuses, not errors.

mod capture;
mod command;
mod foreground;
mod registry;
pub(crate) mod signal;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use capture::OutputCapture;
pub use command::{CommandSpec, parse_env, split_command_line};
pub use foreground::{DEFAULT_TIMEOUT, Deadline, ForegroundRunner, NO_TIMEOUT};
pub use registry::{ProcessHandle, ProcessRegistry, ProcessSummary, SharedProcessRegistry};

/// Terminal (or current) state reported for a process operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Exited,
    Terminated,
    #[serde(rename = "not found")]
    NotFound,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Exited => "exited",
            RunStatus::Terminated => "terminated",
            RunStatus::NotFound => "not found",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of every process operation.
///
/// Never partial: timeouts and failures still carry whatever output was
/// captured before the process stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl RunResult {
    /// Result for a pid the registry does not track.
    #[must_use]
    pub fn not_found(pid: u32) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            pid: Some(pid),
            status: RunStatus::NotFound,
            exit_code: None,
            duration_ms: None,
        }
    }

    /// Result for a process that never started.
    #[must_use]
    pub fn spawn_failed(err: &ProcessError) -> Self {
        Self {
            stdout: String::new(),
            stderr: err.to_string(),
            pid: None,
            status: RunStatus::Failed,
            exit_code: None,
            duration_ms: Some(0),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Running
                | RunStatus::Completed
                | RunStatus::Exited
                | RunStatus::Terminated
                | RunStatus::NotFound
        )
    }
}

/// Errors raised by the process layer.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Process I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse command line: {0}")]
    InvalidCommandLine(String),
    #[error("Failed to parse env var '{0}': expected KEY=VALUE")]
    InvalidEnv(String),
    #[error("Process registry lock poisoned")]
    LockPoisoned,
}

impl ProcessError {
    pub(crate) fn spawn(program: &str, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn status_serializes_with_wire_names() {
        assert_eq!(
            serde_json::to_value(RunStatus::NotFound).unwrap(),
            json!("not found")
        );
        assert_eq!(
            serde_json::to_value(RunStatus::Timeout).unwrap(),
            json!("timeout")
        );
        assert_eq!(RunStatus::Terminated.to_string(), "terminated");
    }

    #[test]
    fn run_result_omits_absent_pid() {
        let result = RunResult {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            pid: None,
            status: RunStatus::Completed,
            exit_code: None,
            duration_ms: None,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"stdout": "hi\n", "stderr": "", "status": "completed"})
        );
    }

    #[test]
    fn spawn_failure_is_a_failed_result() {
        let err = ProcessError::spawn(
            "missing-binary",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        let result = RunResult::spawn_failed(&err);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.stderr.contains("missing-binary"));
        assert!(!result.is_success());
    }
}
