//! Runtime container names.
//!
//! Every runtime container launched by an agent is named
//! `mesos-<agent>.<container>`; the helper container running its executor
//! adds an `.executor` suffix. Names written before the agent id was part
//! of the name, `mesos-<container>`, are still recognized.

use dockvisor_common::constants::{DOCKER_NAME_PREFIX, DOCKER_NAME_SEPARATOR, EXECUTOR_NAME_SUFFIX};
use dockvisor_common::types::{AgentId, ContainerId};

/// Name of the runtime container backing `id`.
#[must_use]
pub fn container_name(agent: &AgentId, id: &ContainerId) -> String {
    format!("{DOCKER_NAME_PREFIX}{agent}{DOCKER_NAME_SEPARATOR}{id}")
}

/// Name of the helper container running the executor of `id`.
#[must_use]
pub fn executor_name(agent: &AgentId, id: &ContainerId) -> String {
    container_name(agent, id) + EXECUTOR_NAME_SUFFIX
}

/// Returns whether `name` belongs to a helper container.
#[must_use]
pub fn is_executor(name: &str) -> bool {
    name.contains(EXECUTOR_NAME_SUFFIX)
}

/// Extracts the container id from a runtime name.
///
/// Accepts names with or without the leading `/` the runtime reports.
/// Returns `None` for names we did not create.
#[must_use]
pub fn parse(name: &str) -> Option<ContainerId> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let rest = name.strip_prefix(DOCKER_NAME_PREFIX)?;
    if rest.is_empty() {
        return None;
    }

    let parts: Vec<&str> = rest.split(DOCKER_NAME_SEPARATOR).collect();
    match parts.as_slice() {
        [legacy] => Some(ContainerId::new(*legacy)),
        [_agent, id] | [_agent, id, _] if !id.is_empty() => Some(ContainerId::new(*id)),
        _ => None,
    }
}
