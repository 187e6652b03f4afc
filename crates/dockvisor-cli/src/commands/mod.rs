//! CLI command definitions and dispatch.

pub mod clean;
pub mod executor;
pub mod ps;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dockvisor_common::config::Flags;

/// dockvisor: supervises Docker containers on behalf of an agent.
#[derive(Parser, Debug)]
#[command(name = "dockvisor", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON file holding the containerizer flags.
    #[arg(long, global = true, env = "DOCKVISOR_FLAGS")]
    pub flags: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Supervise a runtime container until it exits.
    Executor(executor::ExecutorArgs),
    /// List the runtime containers of an agent.
    Ps(ps::PsArgs),
    /// Stop runtime containers that no checkpointed run claims.
    Clean(clean::CleanArgs),
}

impl Cli {
    fn load_flags(&self) -> anyhow::Result<Flags> {
        match &self.flags {
            Some(path) => Flags::load(path)
                .with_context(|| format!("failed to load flags from {}", path.display())),
            None => Ok(Flags::default()),
        }
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the flags cannot be loaded or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let flags = cli.load_flags()?;
    match cli.command {
        Command::Executor(args) => executor::execute(args, &flags).await,
        Command::Ps(args) => ps::execute(args, &flags).await.map(|()| ExitCode::SUCCESS),
        Command::Clean(args) => clean::execute(args, &flags)
            .await
            .map(|()| ExitCode::SUCCESS),
    }
}
