//! Signal delivery for spawned process groups.
//!
//! Children are spawned as process-group leaders on Unix (see
//! `CommandSpec::to_command`), so signals go to the whole group. Elsewhere the
//! fallback is the child handle's own kill.

use std::io;

use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillSignal {
    /// Polite termination request.
    Term,
    /// Immediate termination.
    Kill,
}

#[cfg(unix)]
impl KillSignal {
    fn as_libc_signal(self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        }
    }
}

/// Send `signal` to the child's process group.
///
/// A group that no longer exists counts as delivered.
#[cfg(unix)]
pub(crate) fn signal_child(child: &mut Child, pid: u32, signal: KillSignal) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let result = unsafe { libc::killpg(pgid, signal.as_libc_signal()) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group gone; make sure the direct child is not left behind either.
        if signal == KillSignal::Kill {
            let _ = child.start_kill();
        }
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
pub(crate) fn signal_child(child: &mut Child, _pid: u32, _signal: KillSignal) -> io::Result<()> {
    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err),
    }
}

/// Best-effort forced kill; failures are logged, never returned.
pub(crate) fn force_kill(child: &mut Child, pid: Option<u32>) {
    let result = match pid {
        Some(pid) => signal_child(child, pid, KillSignal::Kill),
        None => child.start_kill(),
    };
    if let Err(err) = result {
        tracing::debug!(?pid, "forced kill failed (process likely exited): {err}");
    }
}

/// Whether a pid still names a live (or unreaped) process.
#[cfg(all(test, unix))]
pub(crate) fn pid_is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}
