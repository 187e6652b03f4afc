//! Resource updates and usage sampling.
//!
//! Both need the pid of the runtime container's init process. It is
//! inspected once and cached on the container.

use std::sync::Arc;

use dockvisor_common::constants::MIN_MEMORY;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{ContainerId, ContainerState, ResourceStatistics, Resources};
use dockvisor_core::cgroup::{self, Hierarchies, cpu, memory};
use dockvisor_core::process::ProcessControl;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::process::ContainerizerProcess;

impl ContainerizerProcess {
    /// Applies a new allocation to a running container.
    pub(crate) fn update(
        &mut self,
        id: &ContainerId,
        resources: Resources,
    ) -> BoxFuture<'static, Result<()>> {
        let done = || future::ready(Ok(())).boxed();
        let Some(container) = self.containers.get_mut(id) else {
            tracing::warn!(container = %id, "ignoring update of unknown container");
            return done();
        };
        if container.state == ContainerState::Destroying {
            tracing::info!(container = %id, "ignoring update of container being destroyed");
            return done();
        }
        if container.resources == resources {
            tracing::info!(container = %id, "ignoring update with unchanged resources");
            return done();
        }

        container.resources = resources;

        if self.flags.docker_mesos_image.is_some() || !cfg!(target_os = "linux") {
            return done();
        }
        if !resources.has_cgroup_resources() {
            tracing::warn!(container = %id, "ignoring update without cpus or mem");
            return done();
        }

        if let Some(pid) = container.pid {
            return future::ready(self.apply(id, resources, pid)).boxed();
        }

        let name = container.name();
        let runtime = Arc::clone(&self.collaborators.runtime);
        let mailbox = match self.mailbox() {
            Ok(mailbox) => mailbox,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let id = id.clone();
        async move {
            let inspected = runtime.inspect(&name).await?;
            let Some(pid) = inspected.pid else {
                tracing::debug!(container = %id, "container is not running, nothing to update");
                return Ok(());
            };
            mailbox
                .call(move |process| {
                    let Some(container) = process.containers.get_mut(&id) else {
                        tracing::info!(container = %id, "container removed before it could be updated");
                        return Ok(());
                    };
                    container.pid = Some(pid);
                    process.apply(&id, resources, pid)
                })
                .await?
        }
        .boxed()
    }

    fn apply(&self, id: &ContainerId, resources: Resources, pid: u32) -> Result<()> {
        tracing::debug!(container = %id, pid, ?resources, "updating cgroups");
        apply(
            &self.collaborators.hierarchies,
            self.collaborators.host.as_ref(),
            resources,
            pid,
        )
    }

    /// Samples the resource usage of a running container.
    pub(crate) fn usage(&mut self, id: &ContainerId) -> BoxFuture<'static, Result<ResourceStatistics>> {
        let failed = |e: DockvisorError| future::ready(Err(e)).boxed();
        if !cfg!(target_os = "linux") {
            return failed(DockvisorError::launch(
                "Does not support usage() on non-linux platform",
            ));
        }
        let Some(container) = self.containers.get(id) else {
            return failed(unknown(id));
        };
        if container.state == ContainerState::Destroying {
            return failed(being_removed(id));
        }
        if self.flags.docker_mesos_image.is_some() {
            return future::ready(Ok(ResourceStatistics::default())).boxed();
        }
        if let Some(pid) = container.pid {
            return future::ready(self.sample(id, pid)).boxed();
        }

        let name = container.name();
        let runtime = Arc::clone(&self.collaborators.runtime);
        let mailbox = match self.mailbox() {
            Ok(mailbox) => mailbox,
            Err(e) => return failed(e),
        };
        let id = id.clone();
        async move {
            let inspected = runtime.inspect(&name).await?;
            mailbox
                .call(move |process| process.sample_inspected(&id, inspected.pid))
                .await?
        }
        .boxed()
    }

    fn sample_inspected(&mut self, id: &ContainerId, pid: Option<u32>) -> Result<ResourceStatistics> {
        let container = self.containers.get_mut(id).ok_or_else(|| {
            DockvisorError::launch(format!("Container has been destroyed: {id}"))
        })?;
        if container.state == ContainerState::Destroying {
            return Err(being_removed(id));
        }
        let pid = pid.ok_or_else(|| DockvisorError::launch("Container is not running"))?;
        container.pid = Some(pid);
        self.sample(id, pid)
    }

    fn sample(&self, id: &ContainerId, pid: u32) -> Result<ResourceStatistics> {
        let container = self.containers.get(id).ok_or_else(|| unknown(id))?;
        let mut statistics = self.collaborators.host.usage(pid)?;
        statistics.mem_limit_bytes = container.resources.mem;
        statistics.cpus_limit = container.resources.cpus;
        Ok(statistics)
    }
}

/// Writes `resources` into the cgroups of `pid`.
///
/// CPU becomes `cpu.shares`. Memory always sets the soft limit and only
/// ever raises the hard limit. A subsystem that is not mounted, or that
/// `pid` has no cgroup in, is skipped.
pub(crate) fn apply(
    hierarchies: &Hierarchies,
    host: &dyn ProcessControl,
    resources: Resources,
    pid: u32,
) -> Result<()> {
    if let (Some(cpus), Some(hierarchy)) = (resources.cpus, hierarchies.cpu()?) {
        match host.cgroup(pid, cgroup::CPU)? {
            None => tracing::warn!(pid, "process is not in a 'cpu' cgroup, skipping cpu update"),
            Some(group) => {
                let shares = cpu::shares_for(cpus);
                cpu::set_shares(hierarchy, &group, shares).map_err(|e| DockvisorError::Cgroup {
                    message: format!("Failed to update 'cpu.shares': {e}"),
                })?;
                tracing::info!(cgroup = %group, shares, "updated 'cpu.shares'");
            }
        }
    }

    if let (Some(mem), Some(hierarchy)) = (resources.mem, hierarchies.memory()?) {
        match host.cgroup(pid, cgroup::MEMORY)? {
            None => {
                tracing::warn!(pid, "process is not in a 'memory' cgroup, skipping memory update");
            }
            Some(group) => {
                let limit = mem.max(MIN_MEMORY);
                memory::set_soft_limit(hierarchy, &group, limit).map_err(|e| {
                    DockvisorError::Cgroup {
                        message: format!("Failed to set 'memory.soft_limit_in_bytes': {e}"),
                    }
                })?;
                tracing::info!(cgroup = %group, limit, "updated 'memory.soft_limit_in_bytes'");

                let current = memory::limit(hierarchy, &group).map_err(|e| DockvisorError::Cgroup {
                    message: format!("Failed to read 'memory.limit_in_bytes': {e}"),
                })?;
                if limit > current {
                    memory::set_limit(hierarchy, &group, limit).map_err(|e| {
                        DockvisorError::Cgroup {
                            message: format!("Failed to set 'memory.limit_in_bytes': {e}"),
                        }
                    })?;
                    tracing::info!(cgroup = %group, limit, "updated 'memory.limit_in_bytes'");
                }
            }
        }
    }
    Ok(())
}

fn unknown(id: &ContainerId) -> DockvisorError {
    DockvisorError::launch(format!("Unknown container: {id}"))
}

fn being_removed(id: &ContainerId) -> DockvisorError {
    DockvisorError::launch(format!("Container is being removed: {id}"))
}
