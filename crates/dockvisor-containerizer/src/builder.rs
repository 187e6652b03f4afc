//! Fluent API for assembling a containerizer.

use std::sync::Arc;

use dockvisor_common::config::Flags;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_core::cgroup::Hierarchies;
use dockvisor_core::process::{Host, ProcessControl};
use dockvisor_runtime::backend::ContainerRuntime;
use dockvisor_runtime::backend::docker::DockerCli;
use dockvisor_runtime::fetcher::{AssetFetcher, Fetcher};
use dockvisor_runtime::process::{HostLauncher, Launcher};
use dockvisor_runtime::reaper::{ProcessReaper, Reaper};

use crate::containerizer::DockerContainerizer;
use crate::process::{Collaborators, ContainerizerProcess};

/// Builder for a [`DockerContainerizer`].
///
/// Collaborators that are not set default to the host implementations:
/// the `docker` CLI named by the flags, the URI fetcher, the polling
/// reaper, real process forks, and the host's `/proc` and cgroups.
pub struct ContainerizerBuilder {
    flags: Flags,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    reaper: Option<Arc<dyn ProcessReaper>>,
    launcher: Option<Arc<dyn Launcher>>,
    host: Option<Arc<dyn ProcessControl>>,
    hierarchies: Option<Hierarchies>,
}

impl std::fmt::Debug for ContainerizerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerizerBuilder")
            .field("flags", &self.flags)
            .field("runtime", &self.runtime.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .field("reaper", &self.reaper.is_some())
            .field("launcher", &self.launcher.is_some())
            .field("host", &self.host.is_some())
            .field("hierarchies", &self.hierarchies)
            .finish()
    }
}

impl ContainerizerBuilder {
    /// Creates a builder with the given flags.
    #[must_use]
    pub fn new(flags: Flags) -> Self {
        Self {
            flags,
            runtime: None,
            fetcher: None,
            reaper: None,
            launcher: None,
            host: None,
            hierarchies: None,
        }
    }

    /// Sets the container runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the asset fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the process reaper.
    #[must_use]
    pub fn reaper(mut self, reaper: Arc<dyn ProcessReaper>) -> Self {
        self.reaper = Some(reaper);
        self
    }

    /// Sets the process launcher.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Sets host process control.
    #[must_use]
    pub fn host(mut self, host: Arc<dyn ProcessControl>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the cgroup hierarchies resource updates write to.
    #[must_use]
    pub fn hierarchies(mut self, hierarchies: Hierarchies) -> Self {
        self.hierarchies = Some(hierarchies);
        self
    }

    /// Validates the flags and starts the containerizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the flags are invalid, no runtime was given and
    /// the `docker` CLI cannot be found, or no tokio runtime is running.
    pub fn build(self) -> Result<DockerContainerizer> {
        self.flags.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DockvisorError::Config {
                message: "the containerizer must be started within a tokio runtime".into(),
            });
        }

        let runtime: Arc<dyn ContainerRuntime> = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(DockerCli::create(&self.flags.docker)?),
        };
        let collaborators = Collaborators {
            runtime,
            fetcher: self.fetcher.unwrap_or_else(|| Arc::new(Fetcher::new())),
            reaper: self.reaper.unwrap_or_else(|| Arc::new(Reaper::default())),
            launcher: self.launcher.unwrap_or_else(|| Arc::new(HostLauncher)),
            host: self.host.unwrap_or_else(|| Arc::new(Host)),
            hierarchies: Arc::new(
                self.hierarchies
                    .unwrap_or_else(|| Hierarchies::global().clone()),
            ),
        };

        tracing::info!(docker = %self.flags.docker, "starting Docker containerizer");
        Ok(DockerContainerizer::new(ContainerizerProcess::spawn(
            self.flags,
            collaborators,
        )))
    }
}
