//! Environment handed to executors.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use dockvisor_common::constants::ENV_PREFIX;
use dockvisor_common::descriptor::ExecutorInfo;
use dockvisor_common::types::AgentId;

/// Where an executor runs and how it reaches its agent.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorContext<'a> {
    /// The executor's sandbox.
    pub directory: &'a Path,
    /// Agent hosting the executor.
    pub agent_id: &'a AgentId,
    /// Address the executor connects back to.
    pub agent_address: &'a str,
    /// Whether the framework checkpoints.
    pub checkpoint: bool,
    /// Time the executor waits for a restarted agent.
    pub recovery_timeout: Duration,
}

/// Builds the environment of `executor`.
///
/// The executor's own command environment wins over the generated
/// variables. `RUST_LOG` is passed through so executors log like the agent.
#[must_use]
pub fn executor_environment(
    executor: &ExecutorInfo,
    context: ExecutorContext<'_>,
) -> BTreeMap<String, String> {
    let var = |name: &str| format!("{ENV_PREFIX}{name}");

    let mut environment = BTreeMap::from([
        (var("FRAMEWORK_ID"), executor.framework_id.to_string()),
        (var("EXECUTOR_ID"), executor.executor_id.to_string()),
        (var("DIRECTORY"), context.directory.display().to_string()),
        (var("AGENT_ID"), context.agent_id.to_string()),
        (var("AGENT_ADDRESS"), context.agent_address.to_string()),
        (
            var("CHECKPOINT"),
            if context.checkpoint { "1" } else { "0" }.to_string(),
        ),
    ]);
    if context.checkpoint {
        let _ = environment.insert(
            var("RECOVERY_TIMEOUT"),
            format!("{}secs", context.recovery_timeout.as_secs()),
        );
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        let _ = environment.insert("RUST_LOG".into(), filter);
    }

    environment.extend(
        executor
            .command
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    environment
}
