//! Process table inspection and signalling.
//!
//! Reads `/proc` to reconstruct process trees, signals whole trees, and
//! encodes wait statuses the way `waitpid(2)` reports them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::ResourceStatistics;

pub use nix::sys::signal::Signal;

/// One entry of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Parent process id.
    pub ppid: u32,
    /// User-mode CPU time, in clock ticks.
    pub utime: u64,
    /// Kernel-mode CPU time, in clock ticks.
    pub stime: u64,
    /// Number of threads.
    pub threads: u32,
    /// Resident set size, in pages.
    pub rss_pages: u64,
}

/// Parses the content of `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
#[must_use]
pub fn parse_stat(pid: u32, content: &str) -> Option<ProcessInfo> {
    let (_, rest) = content.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is the state; the remaining indices are offset by 3 from proc(5).
    Some(ProcessInfo {
        pid,
        ppid: fields.get(1)?.parse().ok()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        threads: fields.get(17)?.parse().ok()?,
        rss_pages: fields.get(21)?.parse::<i64>().ok()?.max(0).unsigned_abs(),
    })
}

/// Reads the stat entry of a single process.
///
/// # Errors
///
/// Returns an error if the process does not exist or its stat file is
/// malformed.
pub fn process(pid: u32) -> Result<ProcessInfo> {
    read_stat(Path::new("/proc"), pid)
}

/// Snapshot of every process visible under `/proc`.
///
/// Processes that exit while the table is being read are skipped.
///
/// # Errors
///
/// Returns an error if `/proc` cannot be listed.
pub fn processes() -> Result<Vec<ProcessInfo>> {
    processes_in(Path::new("/proc"))
}

fn processes_in(proc_root: &Path) -> Result<Vec<ProcessInfo>> {
    let entries = std::fs::read_dir(proc_root).map_err(|e| DockvisorError::io(proc_root, e))?;
    Ok(entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| read_stat(proc_root, pid).ok())
        .collect())
}

fn read_stat(proc_root: &Path, pid: u32) -> Result<ProcessInfo> {
    let path = proc_root.join(pid.to_string()).join("stat");
    let content = std::fs::read_to_string(&path).map_err(|e| DockvisorError::io(&path, e))?;
    parse_stat(pid, &content).ok_or_else(|| DockvisorError::NotFound {
        kind: "process stat",
        id: pid.to_string(),
    })
}

/// Selects `root` and all of its descendants from a process table.
///
/// The root comes first; descendants follow in breadth-first order.
/// Returns an empty list if `root` is not in the table.
#[must_use]
pub fn tree(root: u32, table: &[ProcessInfo]) -> Vec<ProcessInfo> {
    let by_pid: HashMap<u32, &ProcessInfo> = table.iter().map(|p| (p.pid, p)).collect();
    let Some(first) = by_pid.get(&root) else {
        return Vec::new();
    };

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for p in table {
        children.entry(p.ppid).or_default().push(p.pid);
    }

    let mut seen = HashSet::from([root]);
    let mut result = vec![**first];
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for child in children.get(&pid).into_iter().flatten() {
            if seen.insert(*child) {
                if let Some(info) = by_pid.get(child) {
                    result.push(**info);
                }
                queue.push_back(*child);
            }
        }
    }
    result
}

/// Returns whether a process with `pid` exists.
///
/// A process owned by another user still exists even though it cannot be
/// signalled.
#[cfg(target_os = "linux")]
#[must_use]
pub fn exists(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) | Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Stub for non-Linux platforms.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub const fn exists(_pid: u32) -> bool {
    false
}

/// Sends `signal` to `pid` and every process descending from it.
///
/// The tree is frozen with `SIGSTOP` while it is walked so that members
/// cannot fork away, then resumed once the signal is delivered. Returns
/// the pids that were signalled.
///
/// # Errors
///
/// Returns an error if the process table cannot be read or `pid` is not
/// running.
#[cfg(target_os = "linux")]
pub fn killtree(pid: u32, signal: Signal) -> Result<Vec<u32>> {
    let members: Vec<u32> = tree(pid, &processes()?).iter().map(|p| p.pid).collect();
    if members.is_empty() {
        return Err(DockvisorError::NotFound {
            kind: "process",
            id: pid.to_string(),
        });
    }

    let send = |signal: Signal| {
        for member in &members {
            if let Ok(raw) = i32::try_from(*member) {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), signal);
            }
        }
    };
    send(Signal::SIGSTOP);
    send(signal);
    send(Signal::SIGCONT);

    tracing::debug!(pid, %signal, count = members.len(), "signalled process tree");
    Ok(members)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error since `/proc` is Linux-only.
#[cfg(not(target_os = "linux"))]
pub fn killtree(pid: u32, _signal: Signal) -> Result<Vec<u32>> {
    Err(DockvisorError::NotFound {
        kind: "process",
        id: pid.to_string(),
    })
}

/// Wait status of a process that exited with `code`.
#[must_use]
pub const fn exited(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// Wait status of a process killed by `signal`.
#[must_use]
pub const fn signaled(signal: i32, core_dumped: bool) -> i32 {
    let status = signal & 0x7f;
    if core_dumped { status | 0x80 } else { status }
}

/// Exit code encoded in a wait status, if the process exited normally.
#[must_use]
pub const fn exit_code(status: i32) -> Option<i32> {
    if status & 0x7f == 0 {
        Some((status >> 8) & 0xff)
    } else {
        None
    }
}

/// Signal encoded in a wait status, if the process was killed.
#[must_use]
pub const fn term_signal(status: i32) -> Option<i32> {
    let signal = status & 0x7f;
    if signal != 0 && signal != 0x7f {
        Some(signal)
    } else {
        None
    }
}

/// Human-readable description of a wait status.
#[must_use]
pub fn describe(status: i32) -> String {
    if let Some(code) = exit_code(status) {
        return format!("exited with status {code}");
    }
    match term_signal(status) {
        Some(signal) => match Signal::try_from(signal) {
            Ok(named) => format!("terminated with signal {named}"),
            Err(_) => format!("terminated with signal {signal}"),
        },
        None => format!("unknown wait status {status}"),
    }
}

/// Host process operations the containerizer depends on.
///
/// Abstracted so that lifecycle logic can be exercised without real
/// processes.
pub trait ProcessControl: Send + Sync {
    /// Returns whether `pid` is alive.
    fn exists(&self, pid: u32) -> bool;

    /// Signals `pid` and its descendants.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be signalled.
    fn killtree(&self, pid: u32, signal: Signal) -> Result<Vec<u32>>;

    /// Samples usage of the process tree rooted at `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read.
    fn usage(&self, pid: u32) -> Result<ResourceStatistics>;

    /// Returns the cgroup `pid` belongs to for `subsystem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process's cgroup membership cannot be read.
    fn cgroup(&self, pid: u32, subsystem: &str) -> Result<Option<String>>;
}

/// [`ProcessControl`] backed by the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct Host;

impl ProcessControl for Host {
    fn exists(&self, pid: u32) -> bool {
        exists(pid)
    }

    fn killtree(&self, pid: u32, signal: Signal) -> Result<Vec<u32>> {
        killtree(pid, signal)
    }

    fn usage(&self, pid: u32) -> Result<ResourceStatistics> {
        crate::usage::sample(pid)
    }

    fn cgroup(&self, pid: u32, subsystem: &str) -> Result<Option<String>> {
        crate::cgroup::cgroup_of(pid, subsystem)
    }
}
