//! Table formatting for CLI output.

use dockvisor_containerizer::naming;
use dockvisor_runtime::backend::DockerContainer;

/// Column titles matching [`row`].
pub fn header() -> String {
    format!(
        "{:<40} {:<24} {:<9} {:<8} {}",
        "NAME", "CONTAINER", "ROLE", "PID", "ID"
    )
}

/// One line describing a runtime container.
pub fn row(container: &DockerContainer) -> String {
    let name = container.name.trim_start_matches('/');
    let id = naming::parse(name).map_or_else(|| "-".to_string(), |id| id.to_string());
    let role = if naming::is_executor(name) {
        "executor"
    } else {
        "task"
    };
    let pid = container
        .pid
        .map_or_else(|| "-".to_string(), |pid| pid.to_string());
    let short = container.id.get(..12).unwrap_or(&container.id);
    format!("{name:<40} {id:<24} {role:<9} {pid:<8} {short}")
}
