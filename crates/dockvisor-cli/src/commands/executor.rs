//! `dockvisor executor`: supervise one runtime container.
//!
//! Forked by the containerizer, or run inside a helper container when the
//! agent is itself containerized. Exits with the container's exit code and
//! stops the container on SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use dockvisor_common::config::Flags;
use dockvisor_common::error::DockvisorError;
use dockvisor_runtime::backend::ContainerRuntime;
use dockvisor_runtime::backend::docker::DockerCli;
use dockvisor_runtime::process::wait_for_release;
use tokio::signal::unix::{SignalKind, signal};

/// Arguments for the `executor` command.
#[derive(Args, Debug)]
pub struct ExecutorArgs {
    /// Path of the docker CLI.
    #[arg(long, default_value = "docker")]
    pub docker: String,

    /// Name of the runtime container to supervise.
    #[arg(long)]
    pub container: String,

    /// Sandbox on the host; set when running in a helper container.
    #[arg(long, requires = "mapped_directory")]
    pub sandbox_directory: Option<PathBuf>,

    /// Where the sandbox is mounted inside the task container.
    #[arg(long)]
    pub mapped_directory: Option<PathBuf>,
}

/// Executes the `executor` command.
///
/// A forked executor first blocks until the agent has checkpointed its
/// pid, and aborts if the agent goes away before that.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed or
/// `docker wait` fails.
pub async fn execute(args: ExecutorArgs, flags: &Flags) -> anyhow::Result<ExitCode> {
    if args.sandbox_directory.is_none() {
        let released = tokio::task::spawn_blocking(|| wait_for_release(std::io::stdin()))
            .await
            .context("handshake with the agent panicked")?;
        if let Err(e) = released {
            abort(&e);
        }
    }

    tracing::info!(
        container = %args.container,
        sandbox = ?args.sandbox_directory,
        mapped = ?args.mapped_directory,
        "supervising container"
    );

    let docker = DockerCli::new(args.docker);
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let wait = docker.wait(&args.container);
    tokio::pin!(wait);

    let code = loop {
        tokio::select! {
            code = &mut wait => break code?,
            Some(()) = terminate.recv() => {
                tracing::info!(container = %args.container, "received SIGTERM, stopping container");
                if let Err(e) = docker
                    .stop(&args.container, flags.docker_stop_timeout, false)
                    .await
                {
                    tracing::warn!(container = %args.container, error = %e, "failed to stop container");
                }
            }
        }
    };

    tracing::info!(container = %args.container, code, "container exited");
    Ok(exit_code(code))
}

/// Maps a container exit code onto this process's exit code.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[allow(clippy::print_stderr)]
fn abort(error: &DockvisorError) -> ! {
    eprintln!("{error}");
    std::process::abort()
}
