//! Configuration flags for the containerizer and its collaborators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DockvisorError, Result};

/// Agent flags consumed by the containerizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    /// Path (or name on `PATH`) of the runtime CLI.
    pub docker: String,
    /// Runtime daemon socket, mounted into helper containers.
    pub docker_socket: PathBuf,
    /// Mount point of the sandbox inside containers.
    pub docker_sandbox_directory: PathBuf,
    /// Grace period given to `stop` before the runtime kills a container.
    pub docker_stop_timeout: Duration,
    /// How many times a failing `stop` is issued during destroy.
    pub docker_stop_attempts: u32,
    /// Delay before terminated containers are removed from the runtime.
    pub docker_remove_delay: Duration,
    /// Whether unclaimed runtime containers are stopped during recovery.
    pub docker_kill_orphans: bool,
    /// Image to run executors in when the agent itself runs in a container.
    pub docker_mesos_image: Option<String>,
    /// Directory holding the `dockvisor` executor binary.
    pub launcher_dir: PathBuf,
    /// Agent work directory (checkpoints and sandbox links live here).
    pub work_dir: PathBuf,
    /// Time an executor has to reconnect after an agent restart.
    pub recovery_timeout: Duration,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            docker: "docker".into(),
            docker_socket: PathBuf::from(constants::DEFAULT_DOCKER_SOCKET),
            docker_sandbox_directory: PathBuf::from(constants::DEFAULT_SANDBOX_DIRECTORY),
            docker_stop_timeout: Duration::ZERO,
            docker_stop_attempts: 1,
            docker_remove_delay: constants::DEFAULT_REMOVE_DELAY,
            docker_kill_orphans: true,
            docker_mesos_image: None,
            launcher_dir: default_launcher_dir(),
            work_dir: PathBuf::from(constants::DEFAULT_WORK_DIR),
            recovery_timeout: constants::DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

impl Flags {
    /// Loads flags from a JSON file; absent keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DockvisorError::io(path, e))?;
        let flags: Self = serde_json::from_str(&content)?;
        flags.validate()?;
        Ok(flags)
    }

    /// Checks values that would make the containerizer misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.docker.is_empty() {
            return Err(DockvisorError::Config {
                message: "docker path must not be empty".into(),
            });
        }
        if self.docker_stop_attempts == 0 {
            return Err(DockvisorError::Config {
                message: "docker_stop_attempts must be at least 1".into(),
            });
        }
        if !self.docker_sandbox_directory.is_absolute() {
            return Err(DockvisorError::Config {
                message: format!(
                    "docker_sandbox_directory must be absolute: {}",
                    self.docker_sandbox_directory.display()
                ),
            });
        }
        Ok(())
    }

    /// Root of the checkpointed metadata.
    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.work_dir.join("meta")
    }
}

/// Directory of the running binary, where the executor binary is installed.
fn default_launcher_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("/usr/libexec/dockvisor"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let flags = Flags::default();
        assert!(flags.validate().is_ok());
        assert_eq!(flags.docker, "docker");
        assert!(flags.docker_kill_orphans);
        assert_eq!(flags.meta_dir(), PathBuf::from("/var/lib/dockvisor/meta"));
    }

    #[test]
    fn load_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flags.json");
        std::fs::write(
            &path,
            r#"{ "docker": "/usr/bin/docker", "docker_kill_orphans": false }"#,
        )
        .expect("write");

        let flags = Flags::load(&path).expect("load");
        assert_eq!(flags.docker, "/usr/bin/docker");
        assert!(!flags.docker_kill_orphans);
        assert_eq!(flags.docker_remove_delay, constants::DEFAULT_REMOVE_DELAY);
    }

    #[test]
    fn zero_stop_attempts_is_rejected() {
        let flags = Flags {
            docker_stop_attempts: 0,
            ..Flags::default()
        };
        assert!(flags.validate().is_err());
    }
}
