//! Container teardown.
//!
//! What destroy does depends on how far the launch got. Before the runtime
//! container is started there is only an in-flight fetch or pull to cancel.
//! Afterwards the supervising process is signalled, the runtime container is
//! stopped, and the container terminates once the supervising process is
//! observed to exit. Runtime containers are removed from the runtime only
//! after a delay, so their state stays available for inspection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dockvisor_common::error::Result;
use dockvisor_common::types::{ContainerId, ContainerState, Termination};
use dockvisor_core::process::Signal;

use crate::container::{ExitStatus, RunOutcome};
use crate::process::ContainerizerProcess;

impl ContainerizerProcess {
    /// Destroys `id`. `killed` tells whether it is being killed rather than
    /// cleaned up after exiting on its own.
    pub(crate) fn destroy(&mut self, id: &ContainerId, killed: bool) {
        let Some(container) = self.containers.get_mut(id) else {
            tracing::warn!(container = %id, "ignoring destroy of unknown container");
            return;
        };

        if let RunOutcome::Failed(message) = &container.run {
            let termination = Termination::new(killed, format!("Failed to run container: {message}"));
            self.finalize(id, Ok(termination), false);
            return;
        }

        match container.state {
            ContainerState::Destroying => {}
            ContainerState::Fetching => {
                tracing::info!(container = %id, "destroying container while fetching");
                self.collaborators.fetcher.kill(id);
                let termination = Termination::new(killed, "Container destroyed while fetching");
                self.finalize(id, Ok(termination), false);
            }
            ContainerState::Pulling => {
                tracing::info!(container = %id, "destroying container while pulling image");
                if let Some(pull) = container.pull.take() {
                    pull.abort();
                }
                let termination =
                    Termination::new(killed, "Container destroyed while pulling image");
                self.finalize(id, Ok(termination), false);
            }
            ContainerState::Running => {
                tracing::info!(container = %id, killed, "destroying container");
                let runtime = Arc::clone(&self.collaborators.runtime);
                let helper = container.executor_name();
                let _ = tokio::spawn(async move {
                    if let Err(e) = runtime.stop(&helper, Duration::ZERO, false).await {
                        tracing::debug!(container = %helper, error = %e, "failed to stop helper");
                    }
                });

                if let Err(e) = container.advance(ContainerState::Destroying) {
                    tracing::warn!(container = %id, error = %e, "unexpected state change");
                }

                if let Some(pid) = container.executor_pid {
                    tracing::info!(container = %id, pid, "sending SIGTERM to executor");
                    if let Err(e) = self.collaborators.host.killtree(pid, Signal::SIGTERM) {
                        tracing::warn!(container = %id, pid, error = %e, "failed to signal executor");
                    }
                }

                let status = container.status.future();
                let Ok(mailbox) = self.mailbox() else {
                    return;
                };
                let id = id.clone();
                let _ = tokio::spawn(async move {
                    let status = status.await;
                    mailbox.dispatch(move |process| process.stop_container(&id, killed, status));
                });
            }
        }
    }

    /// Stops the runtime container once the launch has settled.
    ///
    /// `status` is what the launch left as the container's status: the
    /// exit of its supervising process, or why there is none.
    fn stop_container(
        &mut self,
        id: &ContainerId,
        killed: bool,
        status: Option<std::result::Result<ExitStatus, String>>,
    ) {
        let Some(container) = self.containers.get(id) else {
            return;
        };
        let Ok(mailbox) = self.mailbox() else {
            return;
        };

        let runtime = Arc::clone(&self.collaborators.runtime);
        let name = container.name();
        let timeout = self.flags.docker_stop_timeout;
        let attempts = self.flags.docker_stop_attempts.max(1);
        let id = id.clone();
        let _ = tokio::spawn(async move {
            let mut result = Ok(());
            for attempt in 1..=attempts {
                result = runtime.stop(&name, timeout, false).await;
                match &result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!(
                        container = %name,
                        attempt,
                        attempts,
                        error = %e,
                        "failed to stop container"
                    ),
                }
            }
            mailbox.dispatch(move |process| process.stopped(&id, killed, status, result));
        });
    }

    fn stopped(
        &mut self,
        id: &ContainerId,
        killed: bool,
        status: Option<std::result::Result<ExitStatus, String>>,
        result: Result<()>,
    ) {
        if !self.containers.contains_key(id) {
            return;
        }
        if let Err(e) = result {
            self.finalize(id, Err(format!("Failed to kill the Docker container: {e}")), true);
            return;
        }

        match status {
            Some(Ok(exit)) => {
                let Ok(mailbox) = self.mailbox() else {
                    return;
                };
                let id = id.clone();
                let _ = tokio::spawn(async move {
                    let status = exit.await;
                    mailbox.dispatch(move |process| process.terminated(&id, killed, status));
                });
            }
            _ => self.terminated(id, killed, None),
        }
    }

    fn terminated(&mut self, id: &ContainerId, killed: bool, status: Option<i32>) {
        if !self.containers.contains_key(id) {
            return;
        }
        let termination = Termination {
            killed,
            status,
            message: if killed {
                "Container killed"
            } else {
                "Container terminated"
            }
            .into(),
        };
        self.finalize(id, Ok(termination), true);
    }

    /// Unregisters `id` and delivers its termination to waiters.
    ///
    /// With `remove`, the runtime container and its helper are removed from
    /// the runtime after the configured delay.
    fn finalize(
        &mut self,
        id: &ContainerId,
        termination: std::result::Result<Termination, String>,
        remove: bool,
    ) {
        let Some(mut container) = self.containers.remove(id) else {
            return;
        };

        let lifetime = Utc::now() - container.created_at;
        match &termination {
            Ok(termination) => tracing::info!(
                container = %id,
                killed = termination.killed,
                status = ?termination.status,
                message = %termination.message,
                lifetime_secs = lifetime.num_seconds(),
                "container terminated"
            ),
            Err(e) => tracing::error!(container = %id, error = %e, "container teardown failed"),
        }
        let _ = container.termination.set(termination);

        if remove {
            let runtime = Arc::clone(&self.collaborators.runtime);
            let delay = self.flags.docker_remove_delay;
            let name = container.name();
            let helper = container.executor_name();
            let _ = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for name in [name, helper] {
                    if let Err(e) = runtime.rm(&name, true).await {
                        tracing::debug!(container = %name, error = %e, "failed to remove container");
                    }
                }
            });
        }
    }
}
