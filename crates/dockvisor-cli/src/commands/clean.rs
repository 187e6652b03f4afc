//! `dockvisor clean`: stop runtime containers an agent left behind.
//!
//! A container is kept when the latest run of some checkpointed executor
//! still claims it; everything else carrying the agent's prefix is stopped
//! and removed.

use std::collections::HashSet;

use clap::Args;
use dockvisor_common::config::Flags;
use dockvisor_common::constants::DOCKER_NAME_PREFIX;
use dockvisor_common::types::{AgentId, ContainerId};
use dockvisor_containerizer::naming;
use dockvisor_runtime::backend::ContainerRuntime;
use dockvisor_runtime::backend::docker::DockerCli;
use dockvisor_runtime::state::AgentState;

/// Arguments for the `clean` command.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Agent whose containers to clean up.
    #[arg(long)]
    pub agent: String,

    /// Only report what would be stopped.
    #[arg(long)]
    pub dry_run: bool,
}

/// Executes the `clean` command.
///
/// # Errors
///
/// Returns an error if the checkpointed state cannot be read or the
/// containers cannot be listed. Failing to stop one container is logged.
pub async fn execute(args: CleanArgs, flags: &Flags) -> anyhow::Result<()> {
    let agent = AgentId::new(args.agent);
    let claimed = AgentState::load(&flags.meta_dir(), &agent)?
        .map(|state| claimed_runs(&state))
        .unwrap_or_default();

    let docker = DockerCli::create(&flags.docker)?;
    let prefix = format!("{DOCKER_NAME_PREFIX}{agent}");
    let mut stopped = 0_usize;
    for container in docker.ps(true, Some(&prefix)).await? {
        let Some(id) = naming::parse(&container.name) else {
            continue;
        };
        if claimed.contains(&id) {
            tracing::debug!(name = %container.name, "container is claimed by a run");
            continue;
        }
        if args.dry_run {
            tracing::info!(name = %container.name, "would stop orphaned container");
            continue;
        }
        match docker.stop(&container.id, flags.docker_stop_timeout, true).await {
            Ok(()) => {
                tracing::info!(name = %container.name, "stopped orphaned container");
                stopped += 1;
            }
            Err(e) => tracing::warn!(name = %container.name, error = %e, "failed to stop orphaned container"),
        }
    }

    tracing::info!(agent = %agent, stopped, "clean finished");
    Ok(())
}

/// Containers the latest, unfinished run of some executor belongs to.
fn claimed_runs(state: &AgentState) -> HashSet<ContainerId> {
    state
        .frameworks
        .values()
        .flat_map(|framework| framework.executors.values())
        .filter_map(|executor| executor.latest.as_ref().and_then(|id| executor.runs.get(id)))
        .filter(|run| !run.completed && run.forked_pid.is_some())
        .map(|run| run.id.clone())
        .collect()
}
