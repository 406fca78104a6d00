//! In-memory capture of a child's stdout and stderr.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Sink pair the reader tasks append into.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the child's piped streams and start copying them into the sinks.
    pub(crate) fn attach(&self, child: &mut Child) -> CaptureReaders {
        let stdout = child
            .stdout
            .take()
            .map(|stream| spawn_reader(stream, Arc::clone(&self.stdout)));
        let stderr = child
            .stderr
            .take()
            .map(|stream| spawn_reader(stream, Arc::clone(&self.stderr)));
        CaptureReaders { stdout, stderr }
    }

    pub fn stdout_text(&self) -> String {
        lossy_snapshot(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        lossy_snapshot(&self.stderr)
    }

    pub fn stdout_len(&self) -> usize {
        self.stdout.lock().map(|data| data.len()).unwrap_or_default()
    }

    pub fn stderr_len(&self) -> usize {
        self.stderr.lock().map(|data| data.len()).unwrap_or_default()
    }

    /// Append a diagnostic line of our own to the stderr sink.
    pub(crate) fn note_stderr(&self, message: &str) {
        if let Ok(mut guard) = self.stderr.lock() {
            if !guard.is_empty() && !guard.ends_with(b"\n") {
                guard.push(b'\n');
            }
            guard.extend_from_slice(message.as_bytes());
            guard.push(b'\n');
        }
    }
}

/// Reader tasks feeding an `OutputCapture`.
#[derive(Debug)]
pub(crate) struct CaptureReaders {
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
}

impl CaptureReaders {
    /// Wait for both readers to hit end-of-stream.
    ///
    /// A grandchild that inherited the pipes can hold them open past the
    /// child's exit; readers still running after `grace` are aborted and the
    /// capture keeps what it has.
    pub(crate) async fn finish(self, grace: Duration) {
        for handle in [self.stdout, self.stderr].into_iter().flatten() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::debug!("output reader still open after {grace:?}; aborting");
                abort.abort();
            }
        }
    }
}

fn spawn_reader<R>(mut reader: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut guard) = buffer.lock() {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(_) => break,
            }
        }
    })
}

fn lossy_snapshot(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    buffer
        .lock()
        .map(|data| String::from_utf8_lossy(&data).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_stderr_starts_on_a_new_line() {
        let capture = OutputCapture::new();
        capture.note_stderr("first");
        if let Ok(mut guard) = capture.stderr.lock() {
            guard.extend_from_slice(b"partial");
        }
        capture.note_stderr("second");
        assert_eq!(capture.stderr_text(), "first\npartial\nsecond\n");
        assert_eq!(capture.stdout_text(), "");
        assert_eq!(capture.stdout_len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("printf out; printf err >&2")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let capture = OutputCapture::new();
        let readers = capture.attach(&mut child);
        child.wait().await.expect("wait");
        readers.finish(Duration::from_secs(2)).await;

        assert_eq!(capture.stdout_text(), "out");
        assert_eq!(capture.stderr_text(), "err");
        assert_eq!(capture.stderr_len(), 3);
    }
}
