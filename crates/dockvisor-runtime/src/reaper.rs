//! Exit notification for supervised processes.

use std::time::Duration;

use async_trait::async_trait;
use dockvisor_core::process;
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Default interval between two polls of a process.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves once a process has terminated.
#[async_trait]
pub trait ProcessReaper: Send + Sync {
    /// Waits for `pid` to terminate.
    ///
    /// Returns the raw wait status when it could be collected (the process
    /// is our child), or `None` when only its disappearance was observed.
    async fn reap(&self, pid: u32) -> Option<i32>;
}

/// [`ProcessReaper`] polling `waitpid(WNOHANG)`.
///
/// Processes that are not children of this process (e.g. after a restart)
/// cannot be waited on; for those, liveness is polled instead.
#[derive(Debug, Clone, Copy)]
pub struct Reaper {
    interval: Duration,
}

impl Reaper {
    /// Creates a reaper polling every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl ProcessReaper for Reaper {
    async fn reap(&self, pid: u32) -> Option<i32> {
        let Ok(raw) = i32::try_from(pid) else {
            return None;
        };
        let target = Pid::from_raw(raw);

        loop {
            match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::debug!(pid, code, "reaped exited process");
                    return Some(process::exited(code));
                }
                Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                    tracing::debug!(pid, %signal, "reaped signalled process");
                    return Some(process::signaled(signal as i32, core_dumped));
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    while process::exists(pid) {
                        tokio::time::sleep(self.interval).await;
                    }
                    tracing::debug!(pid, "process is gone; exit status unknown");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to wait for process");
                    return None;
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
