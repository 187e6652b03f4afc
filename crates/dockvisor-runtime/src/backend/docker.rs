//! [`ContainerRuntime`] backed by the `docker` command-line client.
//!
//! Every operation spawns the CLI with `tokio::process`; output that the
//! containerizer needs is read back from `docker inspect` JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dockvisor_common::constants::{ENV_PREFIX, MIN_MEMORY};
use dockvisor_common::descriptor::Network;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_core::cgroup::cpu;
use serde::Deserialize;
use tokio::process::Command;

use super::{ContainerRuntime, DockerContainer, Image, RunRequest};
use crate::logs;

/// Drives a Docker daemon through its CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    path: String,
}

impl DockerCli {
    /// Creates a client invoking `path`, which may be a bare name looked up
    /// on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be found.
    pub fn create(path: &str) -> Result<Self> {
        let resolved = which::which(path).map_err(|_| DockvisorError::NotFound {
            kind: "docker binary",
            id: path.to_string(),
        })?;
        tracing::debug!(path = %resolved.display(), "using docker binary");
        Ok(Self::new(path))
    }

    /// Creates a client without checking that `path` exists.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Blocks until container `name` stops and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if `docker wait` fails or prints no exit code.
    pub async fn wait(&self, name: &str) -> Result<i32> {
        let args = ["wait".to_string(), name.into()];
        let output = self.exec(&args, None).await?;
        parse_exit_code(&output).ok_or_else(|| DockvisorError::Runtime {
            command: self.command_line(&args),
            message: format!("unexpected output '{}'", output.trim()),
        })
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.path, args.join(" "))
    }

    async fn exec(&self, args: &[String], directory: Option<&Path>) -> Result<String> {
        let command_line = self.command_line(args);
        tracing::debug!(command = %command_line, "running docker");

        let mut command = Command::new(&self.path);
        let _ = command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(directory) = directory {
            let _ = command.current_dir(directory);
        }

        let output = command.output().await.map_err(|e| DockvisorError::Runtime {
            command: command_line.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(DockvisorError::Runtime {
                command: command_line,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn inspect_image(&self, image: &str) -> Result<Image> {
        let output = self
            .exec(&["inspect".into(), "--type=image".into(), image.into()], None)
            .await?;
        parse_image(&output, image)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, directory: &Path, image: &str, force: bool) -> Result<Image> {
        let image = normalize_image(image);
        if !force {
            match self.inspect_image(&image).await {
                Ok(found) => return Ok(found),
                Err(e) => tracing::debug!(%image, error = %e, "image not present locally"),
            }
        }

        tracing::info!(%image, force, "pulling image");
        let _ = self
            .exec(&["pull".into(), image.clone()], Some(directory))
            .await?;
        self.inspect_image(&image).await
    }

    async fn run(&self, request: &RunRequest) -> Result<()> {
        let args = run_arguments(request)?;
        let _ = self.exec(&args, None).await?;
        tracing::info!(name = %request.name, "container started");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<DockerContainer> {
        let output = self.exec(&["inspect".into(), name.into()], None).await?;
        parse_inspect(&output)
    }

    async fn stop(&self, name: &str, timeout: Duration, remove: bool) -> Result<()> {
        let args = vec![
            "stop".into(),
            "-t".into(),
            timeout.as_secs().to_string(),
            name.into(),
        ];
        match self.exec(&args, None).await {
            Ok(_) => {}
            Err(DockvisorError::Runtime { message, .. }) if is_missing(&message) => {
                tracing::debug!(name, "container already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        if remove {
            self.rm(name, true).await?;
        }
        Ok(())
    }

    async fn rm(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".into());
        }
        args.push(name.into());
        match self.exec(&args, None).await {
            Err(DockvisorError::Runtime { message, .. }) if is_missing(&message) => Ok(()),
            result => result.map(|_| ()),
        }
    }

    async fn ps(&self, all: bool, prefix: Option<&str>) -> Result<Vec<DockerContainer>> {
        let mut args = vec!["ps".to_string(), "-q".into(), "--no-trunc".into()];
        if all {
            args.push("-a".into());
        }
        let output = self.exec(&args, None).await?;

        let inspections = output
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| self.inspect(id));
        let mut containers = Vec::new();
        for result in futures::future::join_all(inspections).await {
            match result {
                Ok(container) if prefix.is_none_or(|p| has_prefix(&container.name, p)) => {
                    containers.push(container);
                }
                Ok(_) => {}
                // Removed between `ps` and `inspect`.
                Err(e) => tracing::debug!(error = %e, "skipping container"),
            }
        }
        Ok(containers)
    }

    async fn logs(&self, name: &str, directory: &Path) -> Result<()> {
        let stdout = logs::open_append(&logs::stdout_path(directory))?;
        let stderr = logs::open_append(&logs::stderr_path(directory))?;

        let args = ["logs".to_string(), "--follow".into(), name.into()];
        let mut child = Command::new(&self.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| DockvisorError::Runtime {
                command: self.command_line(&args),
                message: e.to_string(),
            })?;

        let name = name.to_string();
        let _ = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%name, %status, "log stream ended"),
                Err(e) => tracing::warn!(%name, error = %e, "log stream failed"),
            }
        });
        Ok(())
    }
}

/// Builds the `docker run` argument list for `request`.
///
/// # Errors
///
/// Returns an error if the container specification has no Docker settings
/// or asks for a hostname on the host network.
pub fn run_arguments(request: &RunRequest) -> Result<Vec<String>> {
    let docker = request
        .container
        .docker
        .as_ref()
        .ok_or_else(|| DockvisorError::Config {
            message: "container has no docker settings".into(),
        })?;

    let mut args: Vec<String> = vec!["run".into(), "-d".into()];

    if let Some(resources) = request.resources {
        if let Some(cpus) = resources.cpus {
            args.push("--cpu-shares".into());
            args.push(cpu::shares_for(cpus).to_string());
        }
        if let Some(mem) = resources.mem {
            args.push("--memory".into());
            args.push(mem.max(MIN_MEMORY).to_string());
        }
    }

    let mut environment: BTreeMap<String, String> = request.command.environment.clone();
    if let Some(overrides) = &request.environment {
        environment.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    let _ = environment.insert(
        format!("{ENV_PREFIX}SANDBOX"),
        request.mapped_directory.display().to_string(),
    );
    let _ = environment.insert(format!("{ENV_PREFIX}CONTAINER_NAME"), request.name.clone());
    for (key, value) in &environment {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    for volume in &request.container.volumes {
        let container_path = volume.container_path.display();
        let mode = volume.mode.as_str();
        let spec = match &volume.host_path {
            Some(host) => {
                let host: PathBuf = if host.is_absolute() {
                    host.clone()
                } else {
                    request.sandbox.join(host)
                };
                format!("{}:{container_path}:{mode}", host.display())
            }
            None => format!("{container_path}:{mode}"),
        };
        args.push("-v".into());
        args.push(spec);
    }

    args.push("-v".into());
    args.push(format!(
        "{}:{}",
        request.sandbox.display(),
        request.mapped_directory.display()
    ));

    if docker.privileged {
        args.push("--privileged".into());
    }

    for (key, value) in &docker.parameters {
        args.push(format!("--{key}={value}"));
    }

    args.push("--net".into());
    args.push(docker.network.as_str().into());

    if let Some(hostname) = &request.container.hostname {
        if docker.network == Network::Host {
            return Err(DockvisorError::Config {
                message: "Unable to set hostname with the host network".into(),
            });
        }
        args.push("--hostname".into());
        args.push(hostname.clone());
    }

    if request.command.shell {
        args.push("--entrypoint".into());
        args.push("/bin/sh".into());
    }

    args.push("--name".into());
    args.push(request.name.clone());
    args.push(normalize_image(&docker.image));

    if request.command.shell {
        if let Some(value) = &request.command.value {
            args.push("-c".into());
            args.push(value.clone());
        }
    } else {
        args.extend(request.command.value.iter().cloned());
        args.extend(request.command.arguments.iter().cloned());
    }

    Ok(args)
}

/// Appends `:latest` to image references without a tag or digest.
#[must_use]
pub fn normalize_image(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || last.contains('@') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

fn is_missing(message: &str) -> bool {
    message.contains("No such container") || message.contains("no such container")
}

fn parse_exit_code(output: &str) -> Option<i32> {
    output.lines().map(str::trim).find(|l| !l.is_empty())?.parse().ok()
}

fn has_prefix(name: &str, prefix: &str) -> bool {
    name.trim_start_matches('/').starts_with(prefix)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    state: InspectedState,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    #[serde(default)]
    pid: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    config: Option<InspectedImageConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImageConfig {
    entrypoint: Option<Vec<String>>,
}

/// Parses the output of `docker inspect <container>`.
///
/// # Errors
///
/// Returns an error if the output is not an inspection of one container.
pub fn parse_inspect(output: &str) -> Result<DockerContainer> {
    let mut entries: Vec<InspectedContainer> = serde_json::from_str(output)?;
    let entry = entries.pop().ok_or_else(|| DockvisorError::NotFound {
        kind: "container",
        id: "inspect returned no entries".into(),
    })?;
    Ok(DockerContainer {
        id: entry.id,
        name: entry.name,
        pid: (entry.state.pid != 0).then_some(entry.state.pid),
    })
}

fn parse_image(output: &str, name: &str) -> Result<Image> {
    let mut entries: Vec<InspectedImage> = serde_json::from_str(output)?;
    let entry = entries.pop().ok_or_else(|| DockvisorError::NotFound {
        kind: "image",
        id: name.to_string(),
    })?;
    Ok(Image {
        name: name.to_string(),
        entrypoint: entry.config.and_then(|c| c.entrypoint),
    })
}
