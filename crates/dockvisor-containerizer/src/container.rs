//! Per-container bookkeeping.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dockvisor_common::config::Flags;
use dockvisor_common::descriptor::{CommandInfo, ContainerInfo, DockerInfo, LaunchTarget};
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{AgentId, ContainerId, ContainerState, Resources, Termination};
use dockvisor_runtime::{fetcher, logs, paths};
use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use crate::environment::{self, ExecutorContext};
use crate::launch::LaunchRequest;
use crate::naming;
use crate::promise::Promise;

/// Future resolving to the raw wait status of a supervised process, or
/// `None` if it could not be observed.
pub type ExitStatus = Shared<BoxFuture<'static, Option<i32>>>;

/// Outcome of starting the runtime container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Not started yet.
    Pending,
    /// The runtime accepted the container.
    Started,
    /// The launch failed before the container was started, with the reason.
    Failed(String),
}

/// What a launched container was asked to run.
#[derive(Debug)]
pub(crate) struct Launch {
    pub(crate) target: LaunchTarget,
    pub(crate) user: Option<String>,
    pub(crate) agent_address: String,
    pub(crate) checkpoint: bool,
}

/// A container known to the containerizer.
#[derive(Debug)]
pub(crate) struct Container {
    pub(crate) id: ContainerId,
    pub(crate) agent_id: AgentId,
    pub(crate) state: ContainerState,
    /// `None` for containers rebuilt during recovery.
    pub(crate) launch: Option<Launch>,
    pub(crate) directory: Option<PathBuf>,
    symlinked: bool,
    pub(crate) resources: Resources,
    /// Forked executor, signalled on destroy.
    pub(crate) executor_pid: Option<u32>,
    /// Init process of the runtime container, cached once inspected.
    pub(crate) pid: Option<u32>,
    pub(crate) pull: Option<AbortHandle>,
    pub(crate) run: RunOutcome,
    pub(crate) status: Promise<std::result::Result<ExitStatus, String>>,
    pub(crate) termination: Promise<std::result::Result<Termination, String>>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Container {
    /// Prepares the sandbox of a new container and registers its launch.
    ///
    /// Creates the sandbox log files, hands the sandbox to `user`, and
    /// substitutes a symlink for sandbox paths containing `:`, which the
    /// runtime cannot mount.
    pub(crate) fn create(request: LaunchRequest, flags: &Flags) -> Result<Self> {
        let LaunchRequest {
            id,
            target,
            directory,
            user,
            agent_id,
            agent_address,
            checkpoint,
        } = request;

        logs::touch(&directory)?;
        if let Some(user) = &user {
            fetcher::chown(&directory, user)?;
        }

        let link = paths::sandbox_link(&flags.work_dir, &agent_id, &id);
        if let Some(links) = link.parent() {
            std::fs::create_dir_all(links).map_err(|e| DockvisorError::io(links, e))?;
        }

        let (directory, symlinked) = if directory.to_string_lossy().contains(':') {
            symlink(&directory, &link)?;
            tracing::debug!(
                container = %id,
                from = %directory.display(),
                to = %link.display(),
                "sandbox symlinked"
            );
            (link, true)
        } else {
            (directory, false)
        };

        let mut container = Self::new(id, agent_id, ContainerState::Fetching);
        container.resources = target.resources();
        container.launch = Some(Launch {
            target,
            user,
            agent_address,
            checkpoint,
        });
        container.directory = Some(directory);
        container.symlinked = symlinked;
        Ok(container)
    }

    /// A container rebuilt from checkpointed state; it is already running.
    pub(crate) fn recovered(id: ContainerId, agent_id: AgentId) -> Self {
        let mut container = Self::new(id, agent_id, ContainerState::Running);
        container.run = RunOutcome::Started;
        container
    }

    fn new(id: ContainerId, agent_id: AgentId, state: ContainerState) -> Self {
        Self {
            id,
            agent_id,
            state,
            launch: None,
            directory: None,
            symlinked: false,
            resources: Resources::default(),
            executor_pid: None,
            pid: None,
            pull: None,
            run: RunOutcome::Pending,
            status: Promise::new(),
            termination: Promise::new(),
            created_at: Utc::now(),
        }
    }

    /// Moves the container to `next`; states never go backward.
    pub(crate) fn advance(&mut self, next: ContainerState) -> Result<()> {
        if next < self.state {
            return Err(DockvisorError::launch(format!(
                "Container {} cannot move from {} back to {next}",
                self.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn name(&self) -> String {
        naming::container_name(&self.agent_id, &self.id)
    }

    pub(crate) fn executor_name(&self) -> String {
        naming::executor_name(&self.agent_id, &self.id)
    }

    pub(crate) fn container_info(&self) -> Option<&ContainerInfo> {
        self.launch.as_ref().and_then(|launch| launch.target.container())
    }

    pub(crate) fn docker(&self) -> Option<&DockerInfo> {
        self.container_info().and_then(|info| info.docker.as_ref())
    }

    pub(crate) fn command(&self) -> Option<&CommandInfo> {
        self.launch.as_ref().map(|launch| launch.target.command())
    }

    /// Whether the container runs a task supervised by a separate executor.
    pub(crate) fn is_task(&self) -> bool {
        self.launch
            .as_ref()
            .is_some_and(|launch| launch.target.task().is_some())
    }

    /// Environment of the runtime container.
    ///
    /// Tasks run with their command's own environment; containerized
    /// executors get the full executor environment.
    pub(crate) fn environment(&self, flags: &Flags) -> Option<BTreeMap<String, String>> {
        let launch = self.launch.as_ref()?;
        match &launch.target {
            LaunchTarget::Task { .. } => None,
            LaunchTarget::Executor(executor) => Some(environment::executor_environment(
                executor,
                self.executor_context(launch, flags)?,
            )),
        }
    }

    /// Environment of the executor supervising a task.
    pub(crate) fn executor_environment(&self, flags: &Flags) -> Option<BTreeMap<String, String>> {
        let launch = self.launch.as_ref()?;
        Some(environment::executor_environment(
            launch.target.executor(),
            self.executor_context(launch, flags)?,
        ))
    }

    fn executor_context<'a>(
        &'a self,
        launch: &'a Launch,
        flags: &Flags,
    ) -> Option<ExecutorContext<'a>> {
        Some(ExecutorContext {
            directory: self.directory.as_deref()?,
            agent_id: &self.agent_id,
            agent_address: &launch.agent_address,
            checkpoint: launch.checkpoint,
            recovery_timeout: flags.recovery_timeout,
        })
    }

    /// Where the pid supervising this container is checkpointed, if the
    /// framework checkpoints.
    pub(crate) fn forked_pid_path(&self, flags: &Flags) -> Option<PathBuf> {
        let launch = self.launch.as_ref().filter(|launch| launch.checkpoint)?;
        let executor = launch.target.executor();
        let dir = paths::executor_dir(
            &flags.meta_dir(),
            &self.agent_id,
            &executor.framework_id,
            &executor.executor_id,
        );
        Some(paths::forked_pid_path(&paths::run_dir(&dir, &self.id)))
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !self.symlinked {
            return;
        }
        if let Some(link) = &self.directory {
            if let Err(e) = std::fs::remove_file(link) {
                tracing::warn!(
                    container = %self.id,
                    link = %link.display(),
                    error = %e,
                    "failed to remove sandbox symlink"
                );
            }
        }
    }
}

#[cfg(unix)]
fn symlink(target: &std::path::Path, link: &std::path::Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        DockvisorError::launch(format!(
            "Failed to symlink directory '{}' to '{}': {e}",
            target.display(),
            link.display()
        ))
    })
}

#[cfg(not(unix))]
fn symlink(_target: &std::path::Path, _link: &std::path::Path) -> Result<()> {
    Err(DockvisorError::launch("sandbox symlinks require a unix host"))
}
