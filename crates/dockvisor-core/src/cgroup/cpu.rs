//! CPU resource control via cgroups v1.
//!
//! Manages `cpu.shares`, the relative weight of a cgroup under contention.

use std::path::Path;

use dockvisor_common::constants::{CPU_SHARES_PER_CPU, MIN_CPU_SHARES};
use dockvisor_common::error::Result;

/// Converts a CPU allocation into shares, floored at [`MIN_CPU_SHARES`].
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn shares_for(cpus: f64) -> u64 {
    let shares = (CPU_SHARES_PER_CPU as f64 * cpus).max(0.0) as u64;
    shares.max(MIN_CPU_SHARES)
}

/// Sets `cpu.shares` for `cgroup`.
///
/// # Errors
///
/// Returns an error if writing to `cpu.shares` fails.
pub fn set_shares(hierarchy: &Path, cgroup: &str, shares: u64) -> Result<()> {
    super::write_control(hierarchy, cgroup, "cpu.shares", &shares.to_string())?;
    tracing::debug!(cgroup, shares, "cpu shares set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares(hierarchy: &Path, cgroup: &str) -> u64 {
        super::super::read_control(hierarchy, cgroup, "cpu.shares")
            .expect("read")
            .parse()
            .expect("parse")
    }

    #[test]
    fn shares_scale_with_cpus() {
        assert_eq!(shares_for(1.0), 1024);
        assert_eq!(shares_for(2.5), 2560);
    }

    #[test]
    fn shares_are_floored() {
        assert_eq!(shares_for(0.001), MIN_CPU_SHARES);
        assert_eq!(shares_for(0.0), MIN_CPU_SHARES);
    }

    #[test]
    fn set_and_read_shares() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("docker/c1")).expect("mkdir");
        set_shares(dir.path(), "/docker/c1", 512).expect("write");
        assert_eq!(shares(dir.path(), "/docker/c1"), 512);
    }

    #[test]
    fn missing_cgroup_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = set_shares(dir.path(), "/nope", 512).expect_err("should fail");
        assert!(err.to_string().contains("cpu.shares"));
    }
}
