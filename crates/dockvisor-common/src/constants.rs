//! System-wide constants and default paths.

use std::time::Duration;

/// Prefix of every runtime container name created by an agent.
///
/// Containers without this prefix were not launched by us and are
/// ignored during recovery.
pub const DOCKER_NAME_PREFIX: &str = "mesos-";

/// Separator between the agent id and the container id in a runtime name.
pub const DOCKER_NAME_SEPARATOR: &str = ".";

/// Suffix appended to a primary name to form the helper (executor) name.
pub const EXECUTOR_NAME_SUFFIX: &str = ".executor";

/// Directory (relative to the agent directory) holding sandbox symlinks
/// for sandbox paths the runtime CLI cannot mount directly.
pub const DOCKER_SYMLINK_DIRECTORY: &str = "docker/links";

/// Default base directory for agent state.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/dockvisor";

/// Default location of the runtime daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default sandbox mount point inside containers.
pub const DEFAULT_SANDBOX_DIRECTORY: &str = "/mnt/mesos/sandbox";

/// Default delay before removing runtime containers after termination.
pub const DEFAULT_REMOVE_DELAY: Duration = Duration::from_secs(6 * 60 * 60);

/// Default time an executor has to reconnect after an agent restart.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// CPU shares granted per requested CPU.
pub const CPU_SHARES_PER_CPU: u64 = 1024;

/// Lower bound for `cpu.shares`.
pub const MIN_CPU_SHARES: u64 = 10;

/// Lower bound for memory limits, in bytes (32 MiB).
pub const MIN_MEMORY: u64 = 32 * 1024 * 1024;

/// Name of the sandbox file receiving standard output.
pub const SANDBOX_STDOUT: &str = "stdout";

/// Name of the sandbox file receiving standard error.
pub const SANDBOX_STDERR: &str = "stderr";

/// Name of the binary that supervises a launched container.
pub const EXECUTOR_BINARY: &str = "dockvisor";

/// Application name used in log output and state files.
pub const APP_NAME: &str = "dockvisor";

/// Prefix for environment variables handed to executors.
pub const ENV_PREFIX: &str = "DOCKVISOR_";
