//! Container runtime abstraction.
//!
//! The containerizer never talks to a runtime daemon directly; it drives a
//! narrow set of operations through [`ContainerRuntime`], implemented for
//! the `docker` CLI by [`docker::DockerCli`].

pub mod docker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dockvisor_common::descriptor::{CommandInfo, ContainerInfo};
use dockvisor_common::error::Result;
use dockvisor_common::types::Resources;
use serde::{Deserialize, Serialize};

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerContainer {
    /// Runtime-assigned identifier.
    pub id: String,
    /// Container name, as reported (usually with a leading `/`).
    pub name: String,
    /// Pid of the container's init process, if it is running.
    pub pid: Option<u32>,
}

/// An image available to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image reference as requested.
    pub name: String,
    /// Entrypoint baked into the image.
    pub entrypoint: Option<Vec<String>>,
}

/// Everything the runtime needs to start a container.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image, network, volumes and hostname.
    pub container: ContainerInfo,
    /// Command to run inside the container.
    pub command: CommandInfo,
    /// Container name.
    pub name: String,
    /// Sandbox directory on the host.
    pub sandbox: PathBuf,
    /// Where the sandbox is mounted inside the container.
    pub mapped_directory: PathBuf,
    /// Resources to apply at creation.
    pub resources: Option<Resources>,
    /// Extra environment, overriding the command's own.
    pub environment: Option<BTreeMap<String, String>>,
}

/// Operations the containerizer needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Makes `image` available locally, pulling it when absent or `force`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be pulled.
    async fn pull(&self, directory: &Path, image: &str, force: bool) -> Result<Image>;

    /// Starts a detached container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime refuses to start the container.
    async fn run(&self, request: &RunRequest) -> Result<()>;

    /// Describes the container called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist.
    async fn inspect(&self, name: &str) -> Result<DockerContainer>;

    /// Stops `name`, removing it afterwards when `remove` is set.
    ///
    /// Stopping a container that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails to stop the container.
    async fn stop(&self, name: &str, timeout: Duration, remove: bool) -> Result<()>;

    /// Removes `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    async fn rm(&self, name: &str, force: bool) -> Result<()>;

    /// Lists containers whose name starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container list cannot be read.
    async fn ps(&self, all: bool, prefix: Option<&str>) -> Result<Vec<DockerContainer>>;

    /// Streams the logs of `name` into the `stdout` and `stderr` files of
    /// `directory` until the container exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the log stream cannot be started.
    async fn logs(&self, name: &str, directory: &Path) -> Result<()>;
}
