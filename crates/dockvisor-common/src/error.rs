//! Unified error types for the dockvisor workspace.
//!
//! Every crate reports failures through [`DockvisorError`]. Asynchronous
//! pipeline stages carry it until it is intercepted and turned into a
//! container termination message.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockvisorError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container runtime rejected or failed a command.
    #[error("'{command}' failed: {message}")]
    Runtime {
        /// Runtime command line (or its verb) that failed.
        command: String,
        /// Error output reported by the runtime.
        message: String,
    },

    /// Reading or writing cgroup state failed.
    #[error("{message}")]
    Cgroup {
        /// Description of the cgroup failure.
        message: String,
    },

    /// A launch pipeline stage failed.
    #[error("{message}")]
    Launch {
        /// Description of the failed stage.
        message: String,
    },

    /// Fetching sandbox assets failed.
    #[error("failed to fetch '{uri}': {message}")]
    Fetch {
        /// URI being fetched.
        uri: String,
        /// Description of the failure.
        message: String,
    },

    /// Two checkpointed runs resolved to the same supervised pid.
    #[error("Detected duplicate pid {pid} for container {container}")]
    DuplicatePid {
        /// The pid claimed twice.
        pid: u32,
        /// Container whose recovery was rejected.
        container: String,
    },

    /// The containerizer process is no longer running.
    #[error("containerizer has terminated")]
    Terminated,

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DockvisorError {
    /// Shorthand for a [`DockvisorError::Launch`] with the given message.
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    /// Shorthand for an [`DockvisorError::Io`] at `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockvisorError>;
