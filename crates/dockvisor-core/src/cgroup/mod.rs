//! Cgroups v1 resource management.
//!
//! Containers started by the runtime live in cgroups the runtime created;
//! we never create cgroups ourselves. Instead we locate the hierarchy each
//! subsystem is mounted at, find the cgroup a container's pid belongs to,
//! and adjust that cgroup's control files in place.

pub mod cpu;
pub mod memory;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use dockvisor_common::error::{DockvisorError, Result};

/// Name of the CPU subsystem.
pub const CPU: &str = "cpu";

/// Name of the memory subsystem.
pub const MEMORY: &str = "memory";

/// Mount points of the subsystems the containerizer adjusts.
///
/// Detection errors are kept rather than raised so that they surface on
/// every update that needs the hierarchy, not just the first.
#[derive(Debug, Clone)]
pub struct Hierarchies {
    cpu: std::result::Result<Option<PathBuf>, String>,
    memory: std::result::Result<Option<PathBuf>, String>,
}

static HIERARCHIES: OnceLock<Hierarchies> = OnceLock::new();

impl Hierarchies {
    /// Returns the hierarchies of this host, detected on first use.
    pub fn global() -> &'static Self {
        HIERARCHIES.get_or_init(Self::detect)
    }

    /// Detects the hierarchies from `/proc/mounts`.
    #[must_use]
    pub fn detect() -> Self {
        let mounts = std::fs::read_to_string("/proc/mounts")
            .map_err(|e| format!("failed to read /proc/mounts: {e}"));
        let lookup = |subsystem: &str| {
            mounts
                .as_ref()
                .map(|content| hierarchy_from_mounts(content, subsystem))
                .map_err(Clone::clone)
        };
        let hierarchies = Self {
            cpu: lookup(CPU),
            memory: lookup(MEMORY),
        };
        tracing::debug!(?hierarchies, "cgroup hierarchies detected");
        hierarchies
    }

    /// Builds hierarchies from known mount points.
    #[must_use]
    pub fn from_paths(cpu: Option<PathBuf>, memory: Option<PathBuf>) -> Self {
        Self {
            cpu: Ok(cpu),
            memory: Ok(memory),
        }
    }

    /// Mount point of the `cpu` subsystem, if mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table could not be read.
    pub fn cpu(&self) -> Result<Option<&Path>> {
        resolved(&self.cpu, CPU)
    }

    /// Mount point of the `memory` subsystem, if mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table could not be read.
    pub fn memory(&self) -> Result<Option<&Path>> {
        resolved(&self.memory, MEMORY)
    }
}

fn resolved<'a>(
    hierarchy: &'a std::result::Result<Option<PathBuf>, String>,
    subsystem: &str,
) -> Result<Option<&'a Path>> {
    match hierarchy {
        Ok(path) => Ok(path.as_deref()),
        Err(e) => Err(DockvisorError::Cgroup {
            message: format!(
                "Failed to determine the cgroup hierarchy where the '{subsystem}' subsystem is mounted: {e}"
            ),
        }),
    }
}

/// Finds the mount point of `subsystem` in a `/proc/mounts` listing.
#[must_use]
pub fn hierarchy_from_mounts(mounts: &str, subsystem: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let (_source, target, fstype, options) =
            (fields.next()?, fields.next()?, fields.next()?, fields.next()?);
        (fstype == "cgroup" && options.split(',').any(|o| o == subsystem))
            .then(|| PathBuf::from(target))
    })
}

/// Finds the cgroup of `subsystem` in a `/proc/<pid>/cgroup` listing.
#[must_use]
pub fn cgroup_from_listing(listing: &str, subsystem: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        let (_id, controllers, path) = (fields.next()?, fields.next()?, fields.next()?);
        controllers
            .split(',')
            .any(|c| c == subsystem)
            .then(|| path.to_string())
    })
}

/// Returns the cgroup `pid` belongs to in the hierarchy of `subsystem`.
///
/// `None` means the process is not a member of any cgroup with that
/// subsystem attached.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/cgroup` cannot be read.
#[cfg(target_os = "linux")]
pub fn cgroup_of(pid: u32, subsystem: &str) -> Result<Option<String>> {
    let path = PathBuf::from(format!("/proc/{pid}/cgroup"));
    let listing = std::fs::read_to_string(&path).map_err(|e| DockvisorError::Cgroup {
        message: format!("Failed to determine cgroup for the '{subsystem}' subsystem: {e}"),
    })?;
    Ok(cgroup_from_listing(&listing, subsystem))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: cgroups require Linux.
#[cfg(not(target_os = "linux"))]
pub fn cgroup_of(_pid: u32, subsystem: &str) -> Result<Option<String>> {
    Err(DockvisorError::Cgroup {
        message: format!("Linux required to determine the '{subsystem}' cgroup"),
    })
}

/// Path of a control file of `cgroup` within `hierarchy`.
pub(crate) fn control_path(hierarchy: &Path, cgroup: &str, control: &str) -> PathBuf {
    hierarchy.join(cgroup.trim_start_matches('/')).join(control)
}

pub(crate) fn read_control(hierarchy: &Path, cgroup: &str, control: &str) -> Result<String> {
    let path = control_path(hierarchy, cgroup, control);
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| DockvisorError::Cgroup {
            message: format!("Failed to read '{control}' at {}: {e}", path.display()),
        })
}

pub(crate) fn write_control(
    hierarchy: &Path,
    cgroup: &str,
    control: &str,
    value: &str,
) -> Result<()> {
    let path = control_path(hierarchy, cgroup, control);
    std::fs::write(&path, value).map_err(|e| DockvisorError::Cgroup {
        message: format!("Failed to set '{control}' at {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /sys/fs/cgroup tmpfs ro,nosuid,nodev,noexec,mode=755 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
cgroup /sys/fs/cgroup/cpuset cgroup rw,nosuid,nodev,noexec,relatime,cpuset 0 0
";

    #[test]
    fn hierarchy_matches_whole_subsystem_names() {
        assert_eq!(
            hierarchy_from_mounts(MOUNTS, CPU),
            Some(PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            hierarchy_from_mounts(MOUNTS, MEMORY),
            Some(PathBuf::from("/sys/fs/cgroup/memory"))
        );
        assert_eq!(hierarchy_from_mounts(MOUNTS, "blkio"), None);
    }

    #[test]
    fn cgroup_listing_resolves_subsystem_path() {
        let listing = "\
11:memory:/docker/abc123
4:cpu,cpuacct:/docker/abc123
1:name=systemd:/docker/abc123
";
        assert_eq!(
            cgroup_from_listing(listing, CPU).as_deref(),
            Some("/docker/abc123")
        );
        assert_eq!(
            cgroup_from_listing(listing, MEMORY).as_deref(),
            Some("/docker/abc123")
        );
        assert_eq!(cgroup_from_listing(listing, "cpuset"), None);
    }

    #[test]
    fn unified_only_listing_has_no_v1_cgroup() {
        assert_eq!(cgroup_from_listing("0::/user.slice\n", MEMORY), None);
    }

    #[test]
    fn detection_errors_surface_on_access() {
        let hierarchies = Hierarchies {
            cpu: Err("boom".into()),
            memory: Ok(None),
        };
        let err = hierarchies.cpu().expect_err("should fail");
        assert!(err.to_string().contains("'cpu' subsystem"));
        assert!(hierarchies.memory().expect("memory").is_none());
    }

    #[test]
    fn control_path_joins_absolute_cgroup() {
        let path = control_path(Path::new("/sys/fs/cgroup/memory"), "/docker/x", "memory.limit_in_bytes");
        assert_eq!(
            path,
            PathBuf::from("/sys/fs/cgroup/memory/docker/x/memory.limit_in_bytes")
        );
    }
}
