//! # dockvisor: Docker containerizer CLI
//!
//! Hosts the executor the containerizer forks to supervise every task
//! container, plus maintenance commands for an agent's runtime containers.

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli).await
}
