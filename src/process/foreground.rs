//! Run-to-completion execution with a deadline.

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use super::capture::OutputCapture;
use super::command::CommandSpec;
use super::signal::force_kill;
use super::{ProcessError, RunResult, RunStatus, elapsed_ms};

/// Deadline applied when the caller passes `0` (or any non-sentinel value
/// below zero).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout value meaning "wait for as long as the process runs".
pub const NO_TIMEOUT: i64 = -1;

/// How long reader tasks may keep draining after the child is gone.
const CAPTURE_DRAIN_GRACE: Duration = Duration::from_secs(2);
/// How long to wait for the kernel to reap a killed child.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Time bound for a foreground run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    After(Duration),
    Unbounded,
}

impl Deadline {
    /// Interpret a caller-supplied timeout in seconds.
    ///
    /// `NO_TIMEOUT` disables the deadline; `0` and other negative values fall
    /// back to `DEFAULT_TIMEOUT`.
    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds == NO_TIMEOUT {
            return Deadline::Unbounded;
        }
        match u64::try_from(seconds) {
            Ok(0) | Err(_) => Deadline::After(DEFAULT_TIMEOUT),
            Ok(secs) => Deadline::After(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Deadline::After(limit) => Some(limit),
            Deadline::Unbounded => None,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::After(DEFAULT_TIMEOUT)
    }
}

enum Outcome {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
}

/// Executes a `CommandSpec` and waits for it, racing completion against the
/// deadline.
#[derive(Debug, Clone)]
pub struct ForegroundRunner {
    drain_grace: Duration,
}

impl Default for ForegroundRunner {
    fn default() -> Self {
        Self {
            drain_grace: CAPTURE_DRAIN_GRACE,
        }
    }
}

impl ForegroundRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `spec` to completion or deadline.
    ///
    /// Spawn failures come back as a `failed` result; a deadline hit kills
    /// the process group, reaps it, and reports `timeout` with the output
    /// captured up to that point.
    pub async fn run(&self, spec: &CommandSpec, deadline: Deadline) -> RunResult {
        let started = Instant::now();
        let mut command = spec.to_command();
        command.kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let err = ProcessError::spawn(spec.program(), err);
                tracing::warn!(program = spec.program(), "{err}");
                return RunResult::spawn_failed(&err);
            }
        };

        let pid = child.id();
        let capture = OutputCapture::new();
        let readers = capture.attach(&mut child);
        tracing::debug!(?pid, command = %spec.display(), ?deadline, "spawned foreground process");

        let outcome = match deadline {
            Deadline::Unbounded => Outcome::Finished(child.wait().await),
            Deadline::After(limit) => {
                let finished = tokio::select! {
                    status = child.wait() => Some(status),
                    () = tokio::time::sleep(limit) => None,
                };
                match finished {
                    Some(status) => Outcome::Finished(status),
                    None => {
                        tracing::info!(?pid, "foreground process exceeded {limit:?}; killing");
                        force_kill(&mut child, pid);
                        if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                            tracing::warn!(?pid, "killed process was not reaped within {REAP_GRACE:?}");
                        }
                        Outcome::TimedOut
                    }
                }
            }
        };

        readers.finish(self.drain_grace).await;

        let (status, exit_code) = match outcome {
            Outcome::Finished(Ok(exit)) => {
                let status = if exit.success() {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
                (status, exit.code())
            }
            Outcome::Finished(Err(err)) => {
                capture.note_stderr(&format!("Failed to wait for process: {err}"));
                (RunStatus::Failed, None)
            }
            Outcome::TimedOut => (RunStatus::Timeout, None),
        };

        RunResult {
            stdout: capture.stdout_text(),
            stderr: capture.stderr_text(),
            pid: None,
            status,
            exit_code,
            duration_ms: Some(elapsed_ms(started)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::signal::pid_is_alive;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sh(script: &str, dir: &std::path::Path) -> CommandSpec {
        CommandSpec::new("sh", dir).args(["-c", script])
    }

    #[test]
    fn timeout_seconds_mapping() {
        assert_eq!(Deadline::from_seconds(0), Deadline::After(DEFAULT_TIMEOUT));
        assert_eq!(Deadline::from_seconds(-5), Deadline::After(DEFAULT_TIMEOUT));
        assert_eq!(Deadline::from_seconds(i64::MIN), Deadline::After(DEFAULT_TIMEOUT));
        assert_eq!(Deadline::from_seconds(NO_TIMEOUT), Deadline::Unbounded);
        assert_eq!(
            Deadline::from_seconds(7),
            Deadline::After(Duration::from_secs(7))
        );
        assert_eq!(Deadline::Unbounded.duration(), None);
    }

    #[tokio::test]
    async fn completes_before_deadline() {
        let tmp = tempdir().expect("tempdir");
        let result = ForegroundRunner::new()
            .run(&sh("echo hello; echo oops >&2", tmp.path()), Deadline::from_seconds(5))
            .await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.pid.is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_not_timeout() {
        let tmp = tempdir().expect("tempdir");
        let result = ForegroundRunner::new()
            .run(&sh("echo partial; exit 3", tmp.path()), Deadline::from_seconds(5))
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "partial\n");
    }

    #[tokio::test]
    async fn deadline_kills_and_keeps_partial_output() {
        let tmp = tempdir().expect("tempdir");
        let spec = sh("echo started; exec sleep 30", tmp.path());
        let started = Instant::now();
        let result = ForegroundRunner::new()
            .run(&spec, Deadline::After(Duration::from_millis(500)))
            .await;

        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timed_out_process_is_not_left_running() {
        let tmp = tempdir().expect("tempdir");
        let pid_file = tmp.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
        let result = ForegroundRunner::new()
            .run(&sh(&script, tmp.path()), Deadline::After(Duration::from_millis(500)))
            .await;
        assert_eq!(result.status, RunStatus::Timeout);

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .expect("pid file")
            .trim()
            .parse()
            .expect("pid");
        assert!(!pid_is_alive(pid), "process {pid} still alive after timeout");
    }

    #[tokio::test]
    async fn missing_executable_is_a_failed_result() {
        let tmp = tempdir().expect("tempdir");
        let spec = CommandSpec::new("definitely-not-a-real-binary-4242", tmp.path());
        let result = ForegroundRunner::new().run(&spec, Deadline::default()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.stderr.contains("definitely-not-a-real-binary-4242"));
    }

    #[tokio::test]
    async fn empty_arguments_are_forwarded() {
        let tmp = tempdir().expect("tempdir");
        let spec = CommandSpec::new("sh", tmp.path()).args(["-c", "echo $#", "sh", "", "x", ""]);
        let result = ForegroundRunner::new().run(&spec, Deadline::default()).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.stdout, "3\n");
    }

    #[tokio::test]
    async fn env_overlay_reaches_the_child() {
        let tmp = tempdir().expect("tempdir");
        let spec = sh("printf %s \"$TOOLBELT_TEST_VALUE\"", tmp.path())
            .env("TOOLBELT_TEST_VALUE", "overlay");
        let result = ForegroundRunner::new().run(&spec, Deadline::Unbounded).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.stdout, "overlay");
    }
}
