//! Checkpointed agent state.
//!
//! While running, the containerizer checkpoints the pid supervising each
//! container. After a restart, [`AgentState::load`] reads everything the
//! agent checkpointed back so that the containerizer can reattach to
//! executors that survived.

use std::collections::HashMap;
use std::path::Path;

use dockvisor_common::descriptor::ExecutorInfo;
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{AgentId, ContainerId, ExecutorId, FrameworkId};

use crate::paths;

/// Checkpointed state of one run of an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Container backing the run.
    pub id: ContainerId,
    /// Pid of the process supervising the run, if it was checkpointed.
    pub forked_pid: Option<u32>,
    /// Whether the run is known to have terminated.
    pub completed: bool,
}

/// Checkpointed state of an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorState {
    /// Executor identifier.
    pub id: ExecutorId,
    /// Executor description, if it could be read.
    pub info: Option<ExecutorInfo>,
    /// Container of the most recent run.
    pub latest: Option<ContainerId>,
    /// Runs found on disk, by container.
    pub runs: HashMap<ContainerId, RunState>,
}

/// Checkpointed state of a framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkState {
    /// Framework identifier.
    pub id: FrameworkId,
    /// Executors of the framework.
    pub executors: HashMap<ExecutorId, ExecutorState>,
}

/// Checkpointed state of an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    /// Agent identifier.
    pub id: AgentId,
    /// Frameworks with executors on this agent.
    pub frameworks: HashMap<FrameworkId, FrameworkState>,
}

impl AgentState {
    /// Creates an empty state for `id`.
    #[must_use]
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            frameworks: HashMap::new(),
        }
    }

    /// Reads the state checkpointed under `meta` for `agent`.
    ///
    /// Returns `None` when nothing was ever checkpointed for this agent.
    /// An unreadable `executor.info` leaves the executor without info;
    /// recovery then skips it.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory exists but cannot be listed, or a
    /// pid file is malformed.
    pub fn load(meta: &Path, agent: &AgentId) -> Result<Option<Self>> {
        if !paths::agent_dir(meta, agent).is_dir() {
            return Ok(None);
        }

        let mut state = Self::new(agent.clone());
        for framework in subdirectories(&paths::frameworks_dir(meta, agent))? {
            let framework = FrameworkId::new(framework);
            let mut executors = HashMap::new();
            let executors_dir = paths::frameworks_dir(meta, agent)
                .join(framework.as_str())
                .join("executors");
            for executor in subdirectories(&executors_dir)? {
                let executor = ExecutorId::new(executor);
                let dir = paths::executor_dir(meta, agent, &framework, &executor);
                let loaded = load_executor(&dir, executor.clone())?;
                let _ = executors.insert(executor, loaded);
            }
            let _ = state.frameworks.insert(
                framework.clone(),
                FrameworkState {
                    id: framework,
                    executors,
                },
            );
        }

        tracing::info!(
            agent = %agent,
            frameworks = state.frameworks.len(),
            "loaded checkpointed state"
        );
        Ok(Some(state))
    }
}

fn load_executor(dir: &Path, id: ExecutorId) -> Result<ExecutorState> {
    let info_path = paths::executor_info_path(dir);
    let info = match std::fs::read_to_string(&info_path) {
        Ok(content) => match serde_json::from_str::<ExecutorInfo>(&content) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(path = %info_path.display(), error = %e, "unreadable executor info");
                None
            }
        },
        Err(_) => None,
    };

    let latest = std::fs::read_to_string(paths::latest_run_path(dir))
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(ContainerId::new);

    let mut runs = HashMap::new();
    for run in subdirectories(&dir.join("runs"))? {
        let run = ContainerId::new(run);
        let run_dir = paths::run_dir(dir, &run);
        let forked_pid = read_pid(&paths::forked_pid_path(&run_dir))?;
        let completed = paths::completed_path(&run_dir).exists();
        let _ = runs.insert(
            run.clone(),
            RunState {
                id: run,
                forked_pid,
                completed,
            },
        );
    }

    Ok(ExecutorState {
        id,
        info,
        latest,
        runs,
    })
}

fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| DockvisorError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DockvisorError::io(dir, e))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn read_pid(path: &Path) -> Result<Option<u32>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DockvisorError::io(path, e)),
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse().map(Some).map_err(|e| DockvisorError::Config {
        message: format!("malformed pid in {}: {e}", path.display()),
    })
}

/// Writes `content` to `path` atomically, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directories or the file cannot be written.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DockvisorError::io(parent, e))?;
    }
    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = std::path::PathBuf::from(temporary);
    std::fs::write(&temporary, content).map_err(|e| DockvisorError::io(&temporary, e))?;
    std::fs::rename(&temporary, path).map_err(|e| DockvisorError::io(path, e))
}

/// Checkpoints the pid supervising a run.
///
/// # Errors
///
/// Returns an error if the pid file cannot be written.
pub fn checkpoint_pid(path: &Path, pid: u32) -> Result<()> {
    write_atomic(path, &pid.to_string())?;
    tracing::debug!(path = %path.display(), pid, "checkpointed pid");
    Ok(())
}

/// Checkpoints an executor description and marks `run` as its latest run.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn checkpoint_executor(
    meta: &Path,
    agent: &AgentId,
    info: &ExecutorInfo,
    run: &ContainerId,
) -> Result<()> {
    let dir = paths::executor_dir(meta, agent, &info.framework_id, &info.executor_id);
    write_atomic(&paths::executor_info_path(&dir), &serde_json::to_string(info)?)?;
    write_atomic(&paths::latest_run_path(&dir), run.as_str())?;
    std::fs::create_dir_all(paths::run_dir(&dir, run))
        .map_err(|e| DockvisorError::io(paths::run_dir(&dir, run), e))
}

/// Marks a run as terminated.
///
/// # Errors
///
/// Returns an error if the marker cannot be written.
pub fn mark_completed(run_dir: &Path) -> Result<()> {
    write_atomic(&paths::completed_path(run_dir), "")
}
