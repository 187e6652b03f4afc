//! Layout of the agent's checkpointed metadata.
//!
//! ```text
//! <meta>/agents/<agent>/frameworks/<framework>/executors/<executor>/
//!     executor.info
//!     runs/latest
//!     runs/<container>/pids/forked.pid
//!     runs/<container>/completed
//! ```

use std::path::{Path, PathBuf};

use dockvisor_common::constants::DOCKER_SYMLINK_DIRECTORY;
use dockvisor_common::types::{AgentId, ContainerId, ExecutorId, FrameworkId};

/// Directory of an agent's metadata.
#[must_use]
pub fn agent_dir(meta: &Path, agent: &AgentId) -> PathBuf {
    meta.join("agents").join(agent.as_str())
}

/// Directory holding an agent's frameworks.
#[must_use]
pub fn frameworks_dir(meta: &Path, agent: &AgentId) -> PathBuf {
    agent_dir(meta, agent).join("frameworks")
}

/// Directory of an executor's metadata.
#[must_use]
pub fn executor_dir(
    meta: &Path,
    agent: &AgentId,
    framework: &FrameworkId,
    executor: &ExecutorId,
) -> PathBuf {
    frameworks_dir(meta, agent)
        .join(framework.as_str())
        .join("executors")
        .join(executor.as_str())
}

/// Serialized executor description within an executor directory.
#[must_use]
pub fn executor_info_path(executor_dir: &Path) -> PathBuf {
    executor_dir.join("executor.info")
}

/// File naming the executor's most recent run.
#[must_use]
pub fn latest_run_path(executor_dir: &Path) -> PathBuf {
    executor_dir.join("runs").join("latest")
}

/// Directory of one run of an executor.
#[must_use]
pub fn run_dir(executor_dir: &Path, container: &ContainerId) -> PathBuf {
    executor_dir.join("runs").join(container.as_str())
}

/// Checkpointed pid of the process supervising a run.
#[must_use]
pub fn forked_pid_path(run_dir: &Path) -> PathBuf {
    run_dir.join("pids").join("forked.pid")
}

/// Marker written once a run has terminated.
#[must_use]
pub fn completed_path(run_dir: &Path) -> PathBuf {
    run_dir.join("completed")
}

/// Symlink standing in for a sandbox path the runtime cannot mount.
#[must_use]
pub fn sandbox_link(work_dir: &Path, agent: &AgentId, container: &ContainerId) -> PathBuf {
    work_dir
        .join("agents")
        .join(agent.as_str())
        .join(DOCKER_SYMLINK_DIRECTORY)
        .join(container.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forked_pid_path_nests_under_the_run() {
        let executor = executor_dir(
            Path::new("/work/meta"),
            &AgentId::new("a1"),
            &FrameworkId::new("f1"),
            &ExecutorId::new("e1"),
        );
        let path = forked_pid_path(&run_dir(&executor, &ContainerId::new("c1")));
        assert_eq!(
            path,
            PathBuf::from(
                "/work/meta/agents/a1/frameworks/f1/executors/e1/runs/c1/pids/forked.pid"
            )
        );
    }

    #[test]
    fn sandbox_links_live_under_the_agent() {
        let link = sandbox_link(Path::new("/work"), &AgentId::new("a1"), &ContainerId::new("c1"));
        assert_eq!(link, PathBuf::from("/work/agents/a1/docker/links/c1"));
    }
}
