//! Recovery after an agent restart.
//!
//! Runs are matched against the runtime containers the agent left behind.
//! A run whose executor is still alive, or whose executor died but whose
//! helper container still runs, is supervised again. Runtime containers no
//! run claims are orphans and are stopped when configured.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dockvisor_common::constants::DOCKER_NAME_PREFIX;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{AgentId, ContainerId};
use dockvisor_runtime::backend::DockerContainer;
use dockvisor_runtime::state::AgentState;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::container::Container;
use crate::naming;
use crate::process::ContainerizerProcess;

/// Runtime containers found on the host, by the container they belong to.
#[derive(Debug, Default)]
struct Found {
    primaries: HashMap<ContainerId, DockerContainer>,
    helpers: HashMap<ContainerId, DockerContainer>,
}

impl Found {
    fn sort(containers: Vec<DockerContainer>) -> Self {
        let mut found = Self::default();
        for container in containers {
            let Some(id) = naming::parse(&container.name) else {
                tracing::debug!(name = %container.name, "ignoring foreign container");
                continue;
            };
            let by_id = if naming::is_executor(&container.name) {
                &mut found.helpers
            } else {
                &mut found.primaries
            };
            let _ = by_id.insert(id, container);
        }
        found
    }
}

impl ContainerizerProcess {
    /// Recovers the containers of a restarted agent.
    ///
    /// Every recoverable run is attempted even if one fails; the first
    /// failure is returned once orphans have been dealt with.
    pub(crate) fn recover(&mut self, state: Option<AgentState>) -> BoxFuture<'static, Result<()>> {
        tracing::info!("recovering Docker containers");
        let Some(state) = state else {
            return future::ready(Ok(())).boxed();
        };
        let mailbox = match self.mailbox() {
            Ok(mailbox) => mailbox,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let runtime = Arc::clone(&self.collaborators.runtime);
        let prefix = format!("{DOCKER_NAME_PREFIX}{}", state.id);

        async move {
            let containers = runtime.ps(true, Some(&prefix)).await?;
            tracing::debug!(count = containers.len(), "found runtime containers");
            mailbox
                .call(move |process| process.reconcile(&state, Found::sort(containers)))
                .await?
        }
        .boxed()
    }

    fn reconcile(&mut self, state: &AgentState, mut found: Found) -> Result<()> {
        let mut pids = HashSet::new();
        let mut first_error = None;

        let mut frameworks: Vec<_> = state.frameworks.values().collect();
        frameworks.sort_by(|a, b| a.id.cmp(&b.id));
        for framework in frameworks {
            let mut executors: Vec<_> = framework.executors.values().collect();
            executors.sort_by(|a, b| a.id.cmp(&b.id));
            for executor in executors {
                if executor.info.is_none() {
                    tracing::warn!(
                        framework = %framework.id,
                        executor = %executor.id,
                        "skipping recovery of executor because its info could not be recovered"
                    );
                    continue;
                }
                let Some(latest) = &executor.latest else {
                    tracing::warn!(
                        framework = %framework.id,
                        executor = %executor.id,
                        "skipping recovery of executor because its latest run could not be recovered"
                    );
                    continue;
                };
                let Some(run) = executor.runs.get(latest) else {
                    tracing::warn!(
                        framework = %framework.id,
                        executor = %executor.id,
                        run = %latest,
                        "skipping recovery of executor because its latest run is missing"
                    );
                    continue;
                };
                let Some(pid) = run.forked_pid else {
                    continue;
                };
                if run.completed {
                    tracing::debug!(container = %latest, "skipping completed run");
                    continue;
                }

                tracing::info!(
                    container = %latest,
                    framework = %framework.id,
                    executor = %executor.id,
                    pid,
                    "recovering container"
                );
                if let Err(e) = self.recover_container(latest, &state.id, pid, &mut found, &mut pids)
                {
                    tracing::warn!(container = %latest, error = %e, "failed to recover container");
                    let _ = first_error.get_or_insert(e);
                }
            }
        }

        if self.flags.docker_kill_orphans {
            self.kill_orphans(found);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn recover_container(
        &mut self,
        id: &ContainerId,
        agent: &AgentId,
        pid: u32,
        found: &mut Found,
        pids: &mut HashSet<u32>,
    ) -> Result<()> {
        let mut reattach = false;
        if !self.collaborators.host.exists(pid) {
            if let Some(primary) = found.primaries.get(id) {
                if primary.pid.is_none() {
                    tracing::info!(container = %id, "container has already completed");
                    return Ok(());
                }
                if !found.helpers.contains_key(id) {
                    tracing::info!(container = %id, "executor of running container cannot be found");
                    return Ok(());
                }
                reattach = true;
            }
        }

        if !pids.insert(pid) {
            return Err(DockvisorError::DuplicatePid {
                pid,
                container: id.to_string(),
            });
        }
        let _ = found.primaries.remove(id);

        let mut container = Container::recovered(id.clone(), agent.clone());
        let supervised = if reattach {
            let helper = found.helpers.remove(id).ok_or_else(|| {
                DockvisorError::launch(format!("Executor container of {id} vanished"))
            })?;
            tracing::info!(container = %id, helper = %helper.name, "reattaching to executor container");
            self.collaborators
                .launcher
                .spawn_wait_process(&self.flags.docker, &helper.id)?
        } else {
            container.executor_pid = Some(pid);
            pid
        };

        let _ = self.containers.insert(id.clone(), container);
        self.supervise(id, supervised)
    }

    fn kill_orphans(&self, found: Found) {
        let runtime = Arc::clone(&self.collaborators.runtime);
        let timeout = self.flags.docker_stop_timeout;
        for orphan in found.primaries.into_values().chain(found.helpers.into_values()) {
            tracing::info!(name = %orphan.name, id = %orphan.id, "stopping orphaned container");
            let runtime = Arc::clone(&runtime);
            let _ = tokio::spawn(async move {
                if let Err(e) = runtime.stop(&orphan.id, timeout, true).await {
                    tracing::warn!(name = %orphan.name, error = %e, "failed to stop orphaned container");
                }
            });
        }
    }
}
