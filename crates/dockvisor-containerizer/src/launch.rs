//! The launch pipeline.
//!
//! A launch registers the container and then runs its stages in order:
//! fetch the sandbox assets, pull the image, start the runtime container,
//! start the process supervising it, then watch that process. Stages run
//! outside the process; between them, the pipeline goes back through the
//! mailbox to check that the container was not destroyed in the meantime.
//! A failing stage fails the launch and destroys the container.

use std::path::PathBuf;
use std::sync::Arc;

use dockvisor_common::constants::EXECUTOR_BINARY;
use dockvisor_common::descriptor::{
    CommandInfo, ContainerInfo, ContainerType, LaunchTarget, Volume, VolumeMode,
};
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{AgentId, ContainerId, ContainerState, Resources};
use dockvisor_runtime::backend::{Image, RunRequest};
use dockvisor_runtime::process::{ExecutorCommand, executor_arguments};
use dockvisor_runtime::state;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::task::JoinHandle;

use crate::container::{Container, RunOutcome};
use crate::process::{Collaborators, ContainerizerProcess, Mailbox};

/// A request to launch a container.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Identifier chosen by the caller.
    pub id: ContainerId,
    /// What to run.
    pub target: LaunchTarget,
    /// Sandbox directory on the host.
    pub directory: PathBuf,
    /// User owning the sandbox.
    pub user: Option<String>,
    /// Agent launching the container.
    pub agent_id: AgentId,
    /// Address executors use to reach the agent.
    pub agent_address: String,
    /// Whether the framework checkpoints; if so, the supervising pid is
    /// written where recovery will look for it.
    pub checkpoint: bool,
}

/// How the launched container is supervised.
enum Supervisor {
    /// Fork a local executor that follows the container.
    Fork(ExecutorCommand),
    /// Run the executor in a helper container and wait on it.
    Helper { request: RunRequest, docker: String },
    /// The container is the executor; supervise its init process.
    Inspect,
}

/// Everything the stages need, captured at registration.
struct Plan {
    id: ContainerId,
    name: String,
    directory: PathBuf,
    user: Option<String>,
    command: CommandInfo,
    image: String,
    force_pull: bool,
    run: RunRequest,
    supervisor: Supervisor,
}

impl ContainerizerProcess {
    /// Registers a container and starts its launch pipeline.
    ///
    /// The returned future resolves once the container is supervised:
    /// `Ok(true)` if it was launched, `Ok(false)` if the request is not for
    /// a Docker container.
    pub(crate) fn launch(&mut self, request: LaunchRequest) -> BoxFuture<'static, Result<bool>> {
        let id = request.id.clone();
        if self.containers.contains_key(&id) {
            return fail("Container already started");
        }
        match request.target.container() {
            None => {
                tracing::info!(container = %id, "no container info found, skipping launch");
                return future::ready(Ok(false)).boxed();
            }
            Some(info) if info.kind != ContainerType::Docker => {
                tracing::info!(container = %id, "not a Docker container, skipping launch");
                return future::ready(Ok(false)).boxed();
            }
            Some(info) if info.docker.is_none() => {
                return fail("Docker settings are required to launch a Docker container");
            }
            Some(_) => {}
        }

        let mailbox = match self.mailbox() {
            Ok(mailbox) => mailbox,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let container = match Container::create(request, &self.flags) {
            Ok(container) => container,
            Err(e) => return fail(format!("Failed to create container: {e}")),
        };
        let plan = match self.plan(&container) {
            Ok(plan) => plan,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        tracing::info!(
            container = %id,
            image = %plan.image,
            directory = %plan.directory.display(),
            "starting container"
        );
        let _ = self.containers.insert(id.clone(), container);

        let collaborators = self.collaborators.clone();
        let pipeline = tokio::spawn(async move {
            let result = run(&mailbox, collaborators, plan).await;
            if let Err(e) = &result {
                let message = e.to_string();
                let id = id.clone();
                mailbox.dispatch(move |process| process.launch_failed(&id, message));
            }
            result
        });

        async move {
            pipeline
                .await
                .map_err(|e| DockvisorError::launch(format!("Launch was aborted: {e}")))??;
            Ok(true)
        }
        .boxed()
    }

    fn plan(&self, container: &Container) -> Result<Plan> {
        let flags = &self.flags;
        let incomplete = || DockvisorError::launch("Container is missing its launch settings");
        let info = container.container_info().ok_or_else(incomplete)?;
        let docker = container.docker().ok_or_else(incomplete)?;
        let command = container.command().cloned().ok_or_else(incomplete)?;
        let directory = container.directory.clone().ok_or_else(incomplete)?;
        let name = container.name();

        let program = flags.launcher_dir.join(EXECUTOR_BINARY);
        let executor_environment = container.executor_environment(flags).unwrap_or_default();
        let supervisor = if !container.is_task() {
            Supervisor::Inspect
        } else if let Some(image) = &flags.docker_mesos_image {
            let arguments = executor_arguments(
                &flags.docker,
                &name,
                Some((&directory, &flags.docker_sandbox_directory)),
            );
            let mut helper = ContainerInfo::docker(image.clone());
            helper.volumes = vec![
                Volume {
                    host_path: Some(flags.docker_socket.clone()),
                    container_path: flags.docker_socket.clone(),
                    mode: VolumeMode::Ro,
                },
                Volume {
                    host_path: Some(directory.clone()),
                    container_path: directory.clone(),
                    mode: VolumeMode::Rw,
                },
            ];
            Supervisor::Helper {
                request: RunRequest {
                    container: helper,
                    command: CommandInfo::shell(format!(
                        "{} {}",
                        program.display(),
                        arguments.join(" ")
                    )),
                    name: container.executor_name(),
                    sandbox: directory.clone(),
                    mapped_directory: flags.docker_sandbox_directory.clone(),
                    resources: None,
                    environment: Some(executor_environment),
                },
                docker: flags.docker.clone(),
            }
        } else {
            Supervisor::Fork(ExecutorCommand {
                program,
                arguments: executor_arguments(&flags.docker, &name, None),
                directory: directory.clone(),
                environment: executor_environment,
            })
        };

        Ok(Plan {
            id: container.id.clone(),
            run: RunRequest {
                container: info.clone(),
                command: command.clone(),
                name: name.clone(),
                sandbox: directory.clone(),
                mapped_directory: flags.docker_sandbox_directory.clone(),
                resources: None,
                environment: container.environment(flags),
            },
            name,
            user: container.launch.as_ref().and_then(|launch| launch.user.clone()),
            image: docker.image.clone(),
            force_pull: docker.force_pull_image,
            directory,
            command,
            supervisor,
        })
    }

    fn start_pull(
        &mut self,
        id: &ContainerId,
        directory: PathBuf,
        image: String,
        force: bool,
    ) -> Result<JoinHandle<Result<Image>>> {
        let runtime = Arc::clone(&self.collaborators.runtime);
        let container = self.launching(id, "Container was destroyed while launching")?;
        container.advance(ContainerState::Pulling)?;

        let pull = tokio::spawn(async move { runtime.pull(&directory, &image, force).await });
        container.pull = Some(pull.abort_handle());
        Ok(pull)
    }

    fn start_run(&mut self, id: &ContainerId) -> Result<Resources> {
        let container = self.launching(id, "Container was destroyed while pulling image")?;
        container.advance(ContainerState::Running)?;
        container.pull = None;
        Ok(container.resources)
    }

    fn record_run(&mut self, id: &ContainerId, failure: Option<String>) {
        if let Some(container) = self.containers.get_mut(id) {
            container.run = failure.map_or(RunOutcome::Started, RunOutcome::Failed);
        }
    }

    /// Records the pid supervising `id`, checkpointing it if requested.
    fn checkpoint(&mut self, id: &ContainerId, pid: u32) -> Result<()> {
        let flags = Arc::clone(&self.flags);
        let container = self.launching(id, "Container was destroyed while launching")?;
        container.executor_pid = Some(pid);

        if let Some(path) = container.forked_pid_path(&flags) {
            tracing::info!(container = %id, pid, path = %path.display(), "checkpointing executor pid");
            state::checkpoint_pid(&path, pid).map_err(|e| {
                DockvisorError::launch(format!("Failed to checkpoint executor's pid: {e}"))
            })?;
        }
        Ok(())
    }

    /// Fails the launch of `id` and tears the container down.
    pub(crate) fn launch_failed(&mut self, id: &ContainerId, message: String) {
        let Some(container) = self.containers.get_mut(id) else {
            return;
        };
        tracing::error!(container = %id, error = %message, "launch failed");
        if container.run != RunOutcome::Started {
            container.run = RunOutcome::Failed(message.clone());
        }
        let _ = container.status.set(Err(message));
        self.destroy(id, true);
    }
}

fn fail(message: impl Into<String>) -> BoxFuture<'static, Result<bool>> {
    future::ready(Err(DockvisorError::launch(message))).boxed()
}

async fn run(mailbox: &Mailbox, collaborators: Collaborators, plan: Plan) -> Result<()> {
    let Plan {
        id,
        name,
        directory,
        user,
        command,
        image,
        force_pull,
        run: mut request,
        supervisor,
    } = plan;

    collaborators
        .fetcher
        .fetch(&id, &command, &directory, user.as_deref())
        .await?;

    let pull = {
        let id = id.clone();
        let directory = directory.clone();
        mailbox
            .call(move |process| process.start_pull(&id, directory, image, force_pull))
            .await??
    };
    let image = match pull.await {
        Ok(image) => image?,
        Err(e) if e.is_cancelled() => {
            return Err(DockvisorError::launch(
                "Container was destroyed while pulling image",
            ));
        }
        Err(e) => return Err(DockvisorError::launch(format!("Failed to pull image: {e}"))),
    };
    tracing::debug!(container = %id, image = %image.name, "image ready");

    request.resources = Some({
        let id = id.clone();
        mailbox.call(move |process| process.start_run(&id)).await??
    });
    let outcome = collaborators.runtime.run(&request).await;
    {
        let id = id.clone();
        let failure = outcome.as_ref().err().map(ToString::to_string);
        mailbox
            .call(move |process| process.record_run(&id, failure))
            .await?;
    }
    outcome?;

    let pid = match supervisor {
        Supervisor::Fork(executor) => {
            let spawned = collaborators.launcher.spawn_executor(&executor)?;
            let pid = spawned.pid;
            match checkpoint(mailbox, &id, pid).await {
                Ok(()) => spawned.handshake.release()?,
                Err(e) => {
                    spawned.handshake.abort();
                    let reaper = Arc::clone(&collaborators.reaper);
                    let _ = tokio::spawn(async move {
                        let status = reaper.reap(pid).await;
                        tracing::debug!(pid, status = ?status, "reaped aborted executor");
                    });
                    return Err(e);
                }
            }
            pid
        }
        Supervisor::Helper { request, docker } => {
            collaborators.runtime.run(&request).await?;
            let pid = collaborators
                .launcher
                .spawn_wait_process(&docker, &request.name)?;
            checkpoint(mailbox, &id, pid).await?;
            pid
        }
        Supervisor::Inspect => {
            let inspected = collaborators.runtime.inspect(&name).await?;
            let pid = inspected
                .pid
                .ok_or_else(|| DockvisorError::launch("Unable to get executor pid after launch"))?;
            checkpoint(mailbox, &id, pid).await?;
            pid
        }
    };

    let runtime = Arc::clone(&collaborators.runtime);
    let _ = tokio::spawn(async move {
        if let Err(e) = runtime.logs(&name, &directory).await {
            tracing::warn!(container = %name, error = %e, "failed to stream container logs");
        }
    });

    let supervised = id.clone();
    mailbox
        .call(move |process| process.supervise(&supervised, pid))
        .await??;
    tracing::info!(container = %id, pid, "container launched");
    Ok(())
}

async fn checkpoint(mailbox: &Mailbox, id: &ContainerId, pid: u32) -> Result<()> {
    let id = id.clone();
    mailbox
        .call(move |process| process.checkpoint(&id, pid))
        .await?
}
