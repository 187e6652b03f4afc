//! The containerizer process.
//!
//! All container bookkeeping lives in a single [`ContainerizerProcess`]
//! owned by one tokio task. Everything that touches it is sent to that task
//! as a closure through a [`Mailbox`] and runs to completion before the next
//! one, so operations never interleave. Work that has to wait (runtime
//! commands, fetches, process exits) runs outside the process and comes
//! back through the mailbox when it finishes; by then the container may be
//! gone, and every continuation checks for that.

use std::collections::HashMap;
use std::sync::Arc;

use dockvisor_common::config::Flags;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{ContainerId, ContainerState};
use dockvisor_core::cgroup::Hierarchies;
use dockvisor_core::process::ProcessControl;
use dockvisor_runtime::backend::ContainerRuntime;
use dockvisor_runtime::fetcher::AssetFetcher;
use dockvisor_runtime::process::Launcher;
use dockvisor_runtime::reaper::ProcessReaper;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::container::{Container, ExitStatus};

type Message = Box<dyn FnOnce(&mut ContainerizerProcess) + Send>;

/// Everything the containerizer drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Container runtime.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Sandbox asset fetcher.
    pub fetcher: Arc<dyn AssetFetcher>,
    /// Observes the exit of supervised processes.
    pub reaper: Arc<dyn ProcessReaper>,
    /// Forks executors and wait processes.
    pub launcher: Arc<dyn Launcher>,
    /// Signals and samples host processes.
    pub host: Arc<dyn ProcessControl>,
    /// Cgroup mount points used for resource updates.
    pub hierarchies: Arc<Hierarchies>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("hierarchies", &self.hierarchies)
            .finish_non_exhaustive()
    }
}

/// Sending side of the process's queue.
#[derive(Clone)]
pub(crate) struct Mailbox {
    sender: mpsc::UnboundedSender<Message>,
}

impl Mailbox {
    /// Queues `f` without waiting for it. Dropped if the process is gone.
    pub(crate) fn dispatch(&self, f: impl FnOnce(&mut ContainerizerProcess) + Send + 'static) {
        if self.sender.send(Box::new(f)).is_err() {
            tracing::debug!("containerizer terminated, dropping message");
        }
    }

    /// Queues `f` right away and returns a future resolving to its result.
    ///
    /// Queuing happens before the future is polled, so calls are handled
    /// in the order they are made.
    pub(crate) fn call<R>(
        &self,
        f: impl FnOnce(&mut ContainerizerProcess) -> R + Send + 'static,
    ) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let message: Message = Box::new(move |process| {
            let _ = reply.send(f(process));
        });
        let queued = self.sender.send(message).is_ok();
        async move {
            if !queued {
                return Err(DockvisorError::Terminated);
            }
            response.await.map_err(|_| DockvisorError::Terminated)
        }
    }
}

/// State of the containerizer.
pub struct ContainerizerProcess {
    pub(crate) flags: Arc<Flags>,
    pub(crate) collaborators: Collaborators,
    pub(crate) containers: HashMap<ContainerId, Container>,
    this: mpsc::WeakUnboundedSender<Message>,
}

impl ContainerizerProcess {
    /// Starts the process on the current tokio runtime.
    ///
    /// It runs until every [`Mailbox`] is dropped.
    pub(crate) fn spawn(flags: Flags, collaborators: Collaborators) -> Mailbox {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        let mut process = Self {
            flags: Arc::new(flags),
            collaborators,
            containers: HashMap::new(),
            this: sender.downgrade(),
        };

        let _ = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                message(&mut process);
            }
            tracing::debug!(
                containers = process.containers.len(),
                "containerizer process stopped"
            );
        });
        Mailbox { sender }
    }

    /// A mailbox back to this process, for continuations.
    pub(crate) fn mailbox(&self) -> Result<Mailbox> {
        self.this
            .upgrade()
            .map(|sender| Mailbox { sender })
            .ok_or(DockvisorError::Terminated)
    }

    /// Looks up a container a launch stage is about to act on.
    ///
    /// Fails with `absent` if it was destroyed in the meantime, or if its
    /// destruction has begun.
    pub(crate) fn launching(&mut self, id: &ContainerId, absent: &str) -> Result<&mut Container> {
        match self.containers.get_mut(id) {
            None => Err(DockvisorError::launch(absent)),
            Some(container) if container.state == ContainerState::Destroying => Err(
                DockvisorError::launch("Container is being destroyed during launch"),
            ),
            Some(container) => Ok(container),
        }
    }

    /// Watches the process `pid`, which supervises `id`.
    ///
    /// Its exit becomes the container's status; once it exits the
    /// container is destroyed.
    pub(crate) fn supervise(&mut self, id: &ContainerId, pid: u32) -> Result<()> {
        let mailbox = self.mailbox()?;
        let reaper = Arc::clone(&self.collaborators.reaper);
        let container = self
            .containers
            .get_mut(id)
            .ok_or_else(|| DockvisorError::launch("Container was destroyed while launching"))?;

        let exit: ExitStatus = async move { reaper.reap(pid).await }.boxed().shared();
        if !container.status.set(Ok(exit.clone())) {
            return Err(DockvisorError::launch(format!(
                "Container {id} is already supervised"
            )));
        }

        let id = id.clone();
        tracing::debug!(container = %id, pid, "supervising");
        let _ = tokio::spawn(async move {
            let status = exit.await;
            tracing::debug!(container = %id, ?status, "supervised process exited");
            mailbox.dispatch(move |process| process.reaped(&id));
        });
        Ok(())
    }

    fn reaped(&mut self, id: &ContainerId) {
        if !self.containers.contains_key(id) {
            return;
        }
        tracing::info!(container = %id, "executor has exited");
        self.destroy(id, false);
    }
}
