//! `dockvisor ps`: list the runtime containers of an agent.

use clap::Args;
use dockvisor_common::config::Flags;
use dockvisor_common::constants::DOCKER_NAME_PREFIX;
use dockvisor_runtime::backend::ContainerRuntime;
use dockvisor_runtime::backend::docker::DockerCli;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Agent whose containers to list.
    #[arg(long)]
    pub agent: String,

    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the docker CLI cannot be found or listing fails.
#[allow(clippy::print_stdout)]
pub async fn execute(args: PsArgs, flags: &Flags) -> anyhow::Result<()> {
    let docker = DockerCli::create(&flags.docker)?;
    let prefix = format!("{DOCKER_NAME_PREFIX}{}", args.agent);
    let mut containers = docker.ps(args.all, Some(&prefix)).await?;

    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    containers.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{}", output::header());
    for container in &containers {
        println!("{}", output::row(container));
    }
    Ok(())
}
