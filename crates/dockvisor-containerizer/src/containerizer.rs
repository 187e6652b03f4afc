//! Public handle to the containerizer.

use std::collections::HashSet;

use dockvisor_common::config::Flags;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{ContainerId, ResourceStatistics, Resources, Termination};
use dockvisor_runtime::state::AgentState;

use crate::builder::ContainerizerBuilder;
use crate::launch::LaunchRequest;
use crate::process::Mailbox;

/// Launches, supervises, resizes and destroys Docker containers.
///
/// Cheap to clone; every clone talks to the same containerizer, which
/// stops once the last clone is dropped and no work is in flight.
///
/// Each operation is queued when it is called, not when the returned
/// future is first polled: a `wait` followed by a `destroy` always sees
/// the container.
#[derive(Clone)]
pub struct DockerContainerizer {
    mailbox: Mailbox,
}

impl std::fmt::Debug for DockerContainerizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerContainerizer").finish_non_exhaustive()
    }
}

impl DockerContainerizer {
    pub(crate) const fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }

    /// Starts assembling a containerizer.
    #[must_use]
    pub fn builder(flags: Flags) -> ContainerizerBuilder {
        ContainerizerBuilder::new(flags)
    }

    /// Reattaches to the containers of a restarted agent and stops orphans.
    ///
    /// # Errors
    ///
    /// Returns the first container that could not be recovered, or an
    /// error if the runtime could not be listed.
    pub fn recover(
        &self,
        state: Option<AgentState>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let recovery = self.mailbox.call(move |process| process.recover(state));
        async move { recovery.await?.await }
    }

    /// Launches a container.
    ///
    /// Resolves to `false` without doing anything if the request is not
    /// for a Docker container, and to `true` once the container runs and
    /// is supervised.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is in use or any launch stage fails. A
    /// failed launch still terminates the container; see [`Self::wait`].
    pub fn launch(&self, request: LaunchRequest) -> impl Future<Output = Result<bool>> + Send + 'static {
        let launched = self.mailbox.call(move |process| process.launch(request));
        async move { launched.await?.await }
    }

    /// Applies a new resource allocation to a container.
    ///
    /// Unknown containers and containers being destroyed are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected or its
    /// cgroups cannot be written.
    pub fn update(
        &self,
        id: &ContainerId,
        resources: Resources,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let id = id.clone();
        let updated = self
            .mailbox
            .call(move |process| process.update(&id, resources));
        async move { updated.await?.await }
    }

    /// Samples the resource usage of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, being destroyed or
    /// not running.
    pub fn usage(
        &self,
        id: &ContainerId,
    ) -> impl Future<Output = Result<ResourceStatistics>> + Send + 'static {
        let id = id.clone();
        let sampled = self.mailbox.call(move |process| process.usage(&id));
        async move { sampled.await?.await }
    }

    /// Waits for a container to terminate.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, or if its teardown
    /// failed.
    pub fn wait(&self, id: &ContainerId) -> impl Future<Output = Result<Termination>> + Send + 'static {
        let id = id.clone();
        let lookup = {
            let id = id.clone();
            self.mailbox.call(move |process| {
                process
                    .containers
                    .get(&id)
                    .map(|container| container.termination.future())
            })
        };
        async move {
            let termination = lookup
                .await?
                .ok_or_else(|| DockvisorError::launch(format!("Unknown container: {id}")))?;
            match termination.await {
                Some(Ok(termination)) => Ok(termination),
                Some(Err(message)) => Err(DockvisorError::launch(message)),
                None => Err(DockvisorError::launch(format!(
                    "Termination of container {id} was discarded"
                ))),
            }
        }
    }

    /// Destroys a container, killing it if it runs.
    ///
    /// Returns immediately; the outcome is delivered through
    /// [`Self::wait`]. Unknown containers are ignored.
    pub fn destroy(&self, id: &ContainerId) {
        let id = id.clone();
        self.mailbox
            .dispatch(move |process| process.destroy(&id, true));
    }

    /// Lists the containers currently known.
    ///
    /// # Errors
    ///
    /// Returns an error if the containerizer has terminated.
    pub fn containers(&self) -> impl Future<Output = Result<HashSet<ContainerId>>> + Send + 'static {
        self.mailbox
            .call(|process| process.containers.keys().cloned().collect())
    }
}
