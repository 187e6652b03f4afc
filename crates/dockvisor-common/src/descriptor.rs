//! Task and executor descriptors handed to the containerizer by the agent.
//!
//! These mirror what a scheduler attaches to a task: the command to run,
//! the assets to fetch, the container image, and the requested resources.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutorId, FrameworkId, Resources, TaskId};

/// An asset to download into the sandbox before launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandUri {
    /// Location of the asset (`http(s)://`, `file://`, or a local path).
    pub value: String,
    /// Whether the fetched file should be marked executable.
    #[serde(default)]
    pub executable: bool,
    /// Whether recognized archives should be extracted in place.
    #[serde(default)]
    pub extract: bool,
}

/// A command to run, with its environment and assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Command line (when `shell`) or program to execute.
    pub value: Option<String>,
    /// Arguments passed when not running through a shell.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Whether `value` is run through `/bin/sh -c`.
    #[serde(default = "default_shell")]
    pub shell: bool,
    /// Assets fetched into the sandbox before launch.
    #[serde(default)]
    pub uris: Vec<CommandUri>,
    /// Environment variables for the command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// User to run the command as.
    pub user: Option<String>,
}

const fn default_shell() -> bool {
    true
}

impl CommandInfo {
    /// Creates a shell command.
    #[must_use]
    pub fn shell(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            shell: true,
            ..Self::default()
        }
    }
}

/// Kind of container a descriptor asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerType {
    /// A container managed through the Docker runtime.
    Docker,
    /// A container handled by a different containerizer.
    Mesos,
}

/// Network mode of a Docker container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    /// Share the host network namespace.
    #[default]
    Host,
    /// Attach to the runtime's bridge network.
    Bridge,
    /// No networking.
    None,
}

impl Network {
    /// Returns the runtime's name for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Bridge => "bridge",
            Self::None => "none",
        }
    }
}

/// Docker-specific container settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerInfo {
    /// Image to run.
    pub image: String,
    /// Network mode.
    #[serde(default)]
    pub network: Network,
    /// Whether the container runs privileged.
    #[serde(default)]
    pub privileged: bool,
    /// Extra `--key=value` arguments for the runtime's run command.
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
    /// Whether to pull the image even if it is present locally.
    #[serde(default)]
    pub force_pull_image: bool,
}

/// Access mode of a mounted volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeMode {
    /// Read-write.
    #[default]
    Rw,
    /// Read-only.
    Ro,
}

impl VolumeMode {
    /// Returns the runtime's suffix for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rw => "rw",
            Self::Ro => "ro",
        }
    }
}

/// A volume mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Host path; relative paths are resolved against the sandbox.
    pub host_path: Option<PathBuf>,
    /// Mount point inside the container.
    pub container_path: PathBuf,
    /// Access mode.
    #[serde(default)]
    pub mode: VolumeMode,
}

/// Container specification attached to a task or executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Which containerizer should handle this container.
    #[serde(rename = "type")]
    pub kind: ContainerType,
    /// Docker settings, required when `kind` is [`ContainerType::Docker`].
    pub docker: Option<DockerInfo>,
    /// Volumes to mount.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Hostname for the container.
    pub hostname: Option<String>,
}

impl ContainerInfo {
    /// Creates a Docker container specification for `image`.
    #[must_use]
    pub fn docker(image: impl Into<String>) -> Self {
        Self {
            kind: ContainerType::Docker,
            docker: Some(DockerInfo {
                image: image.into(),
                ..DockerInfo::default()
            }),
            volumes: Vec::new(),
            hostname: None,
        }
    }
}

/// Description of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    /// Executor identifier.
    pub executor_id: ExecutorId,
    /// Framework owning the executor.
    pub framework_id: FrameworkId,
    /// Human-readable name.
    pub name: Option<String>,
    /// Command that starts the executor.
    #[serde(default)]
    pub command: CommandInfo,
    /// Container the executor itself runs in, if any.
    pub container: Option<ContainerInfo>,
    /// Resources reserved for the executor.
    #[serde(default)]
    pub resources: Resources,
}

/// Description of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task identifier.
    pub task_id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// Command the task runs; falls back to the container's default.
    pub command: Option<CommandInfo>,
    /// Container the task runs in.
    pub container: Option<ContainerInfo>,
    /// Resources requested by the task.
    #[serde(default)]
    pub resources: Resources,
}

/// What a launch request asks the containerizer to start.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchTarget {
    /// A task running in its own container, supervised by `executor`.
    Task {
        /// The task to run.
        task: TaskInfo,
        /// The executor that supervises it.
        executor: ExecutorInfo,
    },
    /// An executor that is itself containerized.
    Executor(ExecutorInfo),
}

impl LaunchTarget {
    /// Returns the executor of this launch.
    #[must_use]
    pub const fn executor(&self) -> &ExecutorInfo {
        match self {
            Self::Task { executor, .. } | Self::Executor(executor) => executor,
        }
    }

    /// Returns the task, if this launch is for one.
    #[must_use]
    pub const fn task(&self) -> Option<&TaskInfo> {
        match self {
            Self::Task { task, .. } => Some(task),
            Self::Executor(_) => None,
        }
    }

    /// Returns the container specification that decides who handles this
    /// launch.
    #[must_use]
    pub const fn container(&self) -> Option<&ContainerInfo> {
        match self {
            Self::Task { task, .. } => task.container.as_ref(),
            Self::Executor(executor) => executor.container.as_ref(),
        }
    }

    /// Returns the command run inside the container.
    #[must_use]
    pub fn command(&self) -> &CommandInfo {
        match self {
            Self::Task { task, executor } => task.command.as_ref().unwrap_or(&executor.command),
            Self::Executor(executor) => &executor.command,
        }
    }

    /// Returns the combined resources of the launch.
    #[must_use]
    pub fn resources(&self) -> Resources {
        match self {
            Self::Task { task, executor } => task.resources + executor.resources,
            Self::Executor(executor) => executor.resources,
        }
    }
}
