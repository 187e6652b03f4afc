//! Domain primitive types used across the dockvisor workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the inner string representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Caller-supplied identifier of a container.
    ContainerId
);
string_id!(
    /// Identifier of the agent embedding the containerizer.
    AgentId
);
string_id!(
    /// Identifier of a framework owning executors.
    FrameworkId
);
string_id!(
    /// Identifier of an executor within a framework.
    ExecutorId
);
string_id!(
    /// Identifier of a task.
    TaskId
);

/// Resource allocation of a container.
///
/// Compared by value: two allocations requesting the same amounts are
/// equal regardless of how they were built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of CPUs (fractional).
    pub cpus: Option<f64>,
    /// Memory in bytes.
    pub mem: Option<u64>,
    /// Disk in bytes.
    pub disk: Option<u64>,
}

impl Resources {
    /// Creates an allocation with the given CPUs and memory.
    #[must_use]
    pub const fn new(cpus: f64, mem: u64) -> Self {
        Self {
            cpus: Some(cpus),
            mem: Some(mem),
            disk: None,
        }
    }

    /// Returns whether the allocation contains anything cgroups can enforce.
    #[must_use]
    pub const fn has_cgroup_resources(&self) -> bool {
        self.cpus.is_some() || self.mem.is_some()
    }
}

impl std::ops::Add for Resources {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        fn sum<T: std::ops::Add<Output = T>>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            }
        }

        Self {
            cpus: sum(self.cpus, other.cpus),
            mem: sum(self.mem, other.mem),
            disk: sum(self.disk, other.disk),
        }
    }
}

/// Resource usage sample of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatistics {
    /// Seconds since the epoch at which the sample was taken.
    pub timestamp: f64,
    /// Number of processes in the container's process tree.
    pub processes: Option<u32>,
    /// Number of threads in the container's process tree.
    pub threads: Option<u32>,
    /// User-mode CPU time, in seconds.
    pub cpus_user_time_secs: Option<f64>,
    /// Kernel-mode CPU time, in seconds.
    pub cpus_system_time_secs: Option<f64>,
    /// Configured CPU allocation.
    pub cpus_limit: Option<f64>,
    /// Resident set size, in bytes.
    pub mem_rss_bytes: Option<u64>,
    /// Configured memory allocation, in bytes.
    pub mem_limit_bytes: Option<u64>,
}

/// Final outcome of a container's lifecycle, delivered to `wait` callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    /// Whether the container was killed rather than exiting on its own.
    pub killed: bool,
    /// Raw wait status of the supervised process, if it was observed.
    pub status: Option<i32>,
    /// Human-readable description of how the container ended.
    pub message: String,
}

impl Termination {
    /// Creates a termination without an exit status.
    #[must_use]
    pub fn new(killed: bool, message: impl Into<String>) -> Self {
        Self {
            killed,
            status: None,
            message: message.into(),
        }
    }
}

/// Lifecycle state of a container.
///
/// States are ordered; a container only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Sandbox assets are being fetched.
    Fetching,
    /// The image is being pulled.
    Pulling,
    /// The runtime container has been (or is being) started.
    Running,
    /// Teardown is in progress.
    Destroying,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "FETCHING"),
            Self::Pulling => write!(f, "PULLING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Destroying => write!(f, "DESTROYING"),
        }
    }
}
