//! Sandbox log files.
//!
//! Everything a container or its executor prints ends up in the `stdout`
//! and `stderr` files at the root of its sandbox.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use dockvisor_common::constants::{SANDBOX_STDERR, SANDBOX_STDOUT};
use dockvisor_common::error::{DockvisorError, Result};

/// Path of the sandbox's standard output file.
#[must_use]
pub fn stdout_path(directory: &Path) -> PathBuf {
    directory.join(SANDBOX_STDOUT)
}

/// Path of the sandbox's standard error file.
#[must_use]
pub fn stderr_path(directory: &Path) -> PathBuf {
    directory.join(SANDBOX_STDERR)
}

/// Opens `path` for appending, creating it if needed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DockvisorError::io(path, e))
}

/// Creates the sandbox's `stdout` and `stderr` files if they are missing.
///
/// # Errors
///
/// Returns an error if either file cannot be created.
pub fn touch(directory: &Path) -> Result<()> {
    let _ = open_append(&stdout_path(directory))?;
    let _ = open_append(&stderr_path(directory))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn touch_creates_both_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path()).expect("touch");
        assert!(stdout_path(dir.path()).exists());
        assert!(stderr_path(dir.path()).exists());
    }

    #[test]
    fn touch_keeps_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(stdout_path(dir.path()), "earlier\n").expect("write");
        touch(dir.path()).expect("touch");

        let mut file = open_append(&stdout_path(dir.path())).expect("open");
        file.write_all(b"later\n").expect("append");
        let content = std::fs::read_to_string(stdout_path(dir.path())).expect("read");
        assert_eq!(content, "earlier\nlater\n");
    }

    #[test]
    fn touch_in_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(touch(&dir.path().join("missing")).is_err());
    }
}
