//! Spawning of the processes that supervise containers.
//!
//! The executor is forked in a new session and blocks on its stdin until
//! the parent has checkpointed its pid, so that an agent crash between
//! the fork and the checkpoint never leaves an untracked executor behind.
//! The parent side of that handshake is [`Handshake`]; the executor side
//! is [`wait_for_release`].

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use dockvisor_common::error::{DockvisorError, Result};

use crate::logs;

/// Message printed by an executor that lost its parent before the
/// handshake completed.
pub const HANDSHAKE_FAILURE: &str = "Failed to synchronize with agent (it has probably exited)";

/// How to start an executor process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments after the program.
    pub arguments: Vec<String>,
    /// Working directory; the sandbox.
    pub directory: PathBuf,
    /// Environment added to the inherited one.
    pub environment: BTreeMap<String, String>,
}

/// Parent side of the startup handshake with a forked executor.
pub struct Handshake {
    pipe: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("open", &self.pipe.is_some())
            .finish()
    }
}

impl Handshake {
    /// Wraps the write end of the child's stdin.
    #[must_use]
    pub fn new(pipe: Box<dyn Write + Send>) -> Self {
        Self { pipe: Some(pipe) }
    }

    /// A handshake with nothing on the other end.
    #[must_use]
    pub fn none() -> Self {
        Self { pipe: None }
    }

    /// Lets the child continue by writing one byte to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte cannot be written, typically because
    /// the child already exited.
    pub fn release(mut self) -> Result<()> {
        let Some(mut pipe) = self.pipe.take() else {
            return Ok(());
        };
        pipe.write_all(&[0])
            .and_then(|()| pipe.flush())
            .map_err(|e| DockvisorError::launch(format!("Failed to synchronize with child process: {e}")))
    }

    /// Closes the pipe without writing, making the child abort.
    pub fn abort(mut self) {
        drop(self.pipe.take());
    }
}

/// A freshly forked executor, still blocked on its handshake.
#[derive(Debug)]
pub struct SpawnedExecutor {
    /// Pid of the executor.
    pub pid: u32,
    /// Handshake that releases the executor.
    pub handshake: Handshake,
}

/// Forks the processes that supervise containers.
pub trait Launcher: Send + Sync {
    /// Forks an executor that waits for its handshake before running.
    ///
    /// Its output goes to the sandbox's `stdout` and `stderr` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be forked.
    fn spawn_executor(&self, command: &ExecutorCommand) -> Result<SpawnedExecutor>;

    /// Starts a process that exits with the exit code of the runtime
    /// container `name`, returning its pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn spawn_wait_process(&self, docker: &str, name: &str) -> Result<u32>;
}

/// [`Launcher`] forking real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLauncher;

impl Launcher for HostLauncher {
    // The children are reaped by the reaper through their pid.
    #[allow(clippy::zombie_processes)]
    fn spawn_executor(&self, command: &ExecutorCommand) -> Result<SpawnedExecutor> {
        let stdout = logs::open_append(&logs::stdout_path(&command.directory))?;
        let stderr = logs::open_append(&logs::stderr_path(&command.directory))?;

        let mut process = Command::new(&command.program);
        let _ = process
            .args(&command.arguments)
            .envs(&command.environment)
            .current_dir(&command.directory)
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(stderr);
        new_session(&mut process);

        let mut child = process.spawn().map_err(|e| {
            DockvisorError::launch(format!(
                "Failed to fork executor '{}': {e}",
                command.program.display()
            ))
        })?;
        let pid = child.id();
        let handshake = child
            .stdin
            .take()
            .map_or_else(Handshake::none, |stdin| Handshake::new(Box::new(stdin)));

        tracing::info!(pid, program = %command.program.display(), "forked executor");
        Ok(SpawnedExecutor { pid, handshake })
    }

    #[allow(clippy::zombie_processes)]
    fn spawn_wait_process(&self, docker: &str, name: &str) -> Result<u32> {
        let script = format!("exit $({docker} wait {name})");
        let child = Command::new("sh")
            .args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DockvisorError::launch(format!("Failed to launch wait process: {e}")))?;
        tracing::debug!(pid = child.id(), name, "waiting on container");
        Ok(child.id())
    }
}

/// Builds the command line of an executor supervising `container`.
#[must_use]
pub fn executor_arguments(
    docker: &str,
    container: &str,
    sandbox: Option<(&Path, &Path)>,
) -> Vec<String> {
    let mut arguments = vec![
        "executor".to_string(),
        format!("--docker={docker}"),
        format!("--container={container}"),
    ];
    if let Some((directory, mapped)) = sandbox {
        arguments.push(format!("--sandbox-directory={}", directory.display()));
        arguments.push(format!("--mapped-directory={}", mapped.display()));
    }
    arguments
}

/// Blocks until the parent releases the handshake by writing one byte.
///
/// # Errors
///
/// Returns an error if the input is closed or unreadable before a byte
/// arrives, meaning the parent is gone.
pub fn wait_for_release(mut input: impl Read) -> Result<()> {
    let mut byte = [0_u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(1) => return Ok(()),
            Ok(_) => return Err(DockvisorError::launch(HANDSHAKE_FAILURE)),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(DockvisorError::launch(format!("{HANDSHAKE_FAILURE}: {e}"))),
        }
    }
}

#[cfg(unix)]
fn new_session(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the hook runs between fork and exec and only calls setsid,
    // which is async-signal-safe.
    unsafe {
        let _ = command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn new_session(_command: &mut Command) {}
