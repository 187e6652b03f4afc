//! # dockvisor-containerizer
//!
//! Runs tasks and executors in Docker containers on behalf of an agent.
//!
//! Provides the [`DockerContainerizer`](containerizer::DockerContainerizer),
//! assembled through a [`ContainerizerBuilder`](builder::ContainerizerBuilder):
//! - `launch` fetches assets, pulls the image, starts the container and
//!   supervises it through an executor.
//! - `update` and `usage` resize and sample running containers.
//! - `wait` and `destroy` observe and drive teardown.
//! - `recover` reattaches to the containers of a restarted agent.
//!
//! # Example
//!
//! ```rust,no_run
//! use dockvisor_common::config::Flags;
//! use dockvisor_containerizer::containerizer::DockerContainerizer;
//!
//! # async fn run() -> dockvisor_common::error::Result<()> {
//! let containerizer = DockerContainerizer::builder(Flags::default()).build()?;
//! containerizer.recover(None).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
mod container;
pub mod containerizer;
mod destroy;
pub mod environment;
pub mod launch;
pub mod naming;
mod process;
mod promise;
mod recover;
mod resources;

pub use builder::ContainerizerBuilder;
pub use containerizer::DockerContainerizer;
pub use launch::LaunchRequest;
