//! Resource usage sampling of process trees.

use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::ResourceStatistics;

use crate::process::{self, ProcessInfo};

/// Units needed to convert `/proc` counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Units {
    /// Clock ticks per second.
    pub ticks_per_second: u64,
    /// Bytes per memory page.
    pub page_size: u64,
}

impl Units {
    /// Queries the running system.
    ///
    /// # Errors
    ///
    /// Returns an error if `sysconf` reports no value.
    pub fn system() -> Result<Self> {
        Ok(Self {
            ticks_per_second: sysconf(libc::_SC_CLK_TCK, "_SC_CLK_TCK")?,
            page_size: sysconf(libc::_SC_PAGESIZE, "_SC_PAGESIZE")?,
        })
    }
}

fn sysconf(name: libc::c_int, label: &str) -> Result<u64> {
    // SAFETY: sysconf has no preconditions and only reads a constant.
    let value = unsafe { libc::sysconf(name) };
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| DockvisorError::Config {
            message: format!("sysconf({label}) returned {value}"),
        })
}

/// Sums the usage of a process tree.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(tree: &[ProcessInfo], units: Units, timestamp: f64) -> ResourceStatistics {
    let ticks = units.ticks_per_second as f64;
    let utime: u64 = tree.iter().map(|p| p.utime).sum();
    let stime: u64 = tree.iter().map(|p| p.stime).sum();
    let rss: u64 = tree.iter().map(|p| p.rss_pages).sum();
    let threads: u32 = tree.iter().map(|p| p.threads).sum();

    ResourceStatistics {
        timestamp,
        processes: u32::try_from(tree.len()).ok(),
        threads: Some(threads),
        cpus_user_time_secs: Some(utime as f64 / ticks),
        cpus_system_time_secs: Some(stime as f64 / ticks),
        mem_rss_bytes: Some(rss.saturating_mul(units.page_size)),
        ..ResourceStatistics::default()
    }
}

/// Samples the process tree rooted at `pid`.
///
/// # Errors
///
/// Returns an error if `/proc` cannot be read or `pid` is not running.
pub fn sample(pid: u32) -> Result<ResourceStatistics> {
    let tree = process::tree(pid, &process::processes()?);
    if tree.is_empty() {
        return Err(DockvisorError::NotFound {
            kind: "process",
            id: pid.to_string(),
        });
    }
    Ok(aggregate(&tree, Units::system()?, now()))
}

#[allow(clippy::cast_precision_loss)]
fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
