//! Memory resource control via cgroups v1.
//!
//! Manages `memory.soft_limit_in_bytes` and `memory.limit_in_bytes`.

use std::path::Path;

use dockvisor_common::error::{DockvisorError, Result};

const SOFT_LIMIT: &str = "memory.soft_limit_in_bytes";
const HARD_LIMIT: &str = "memory.limit_in_bytes";

/// Sets the soft limit (reclaim target under pressure) of `cgroup`.
///
/// # Errors
///
/// Returns an error if writing `memory.soft_limit_in_bytes` fails.
pub fn set_soft_limit(hierarchy: &Path, cgroup: &str, bytes: u64) -> Result<()> {
    super::write_control(hierarchy, cgroup, SOFT_LIMIT, &bytes.to_string())?;
    tracing::debug!(cgroup, bytes, "memory soft limit set");
    Ok(())
}

/// Reads the hard limit of `cgroup`.
///
/// # Errors
///
/// Returns an error if the control file cannot be read or parsed.
pub fn limit(hierarchy: &Path, cgroup: &str) -> Result<u64> {
    read_bytes(hierarchy, cgroup, HARD_LIMIT)
}

/// Sets the hard limit of `cgroup`.
///
/// # Errors
///
/// Returns an error if writing `memory.limit_in_bytes` fails.
pub fn set_limit(hierarchy: &Path, cgroup: &str, bytes: u64) -> Result<()> {
    super::write_control(hierarchy, cgroup, HARD_LIMIT, &bytes.to_string())?;
    tracing::debug!(cgroup, bytes, "memory hard limit set");
    Ok(())
}

fn read_bytes(hierarchy: &Path, cgroup: &str, control: &str) -> Result<u64> {
    let raw = super::read_control(hierarchy, cgroup, control)?;
    raw.parse().map_err(|e| DockvisorError::Cgroup {
        message: format!("Failed to parse '{control}' value '{raw}': {e}"),
    })
}
