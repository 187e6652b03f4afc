//! Scripted collaborators for driving the containerizer without Docker.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dockvisor_common::config::Flags;
use dockvisor_common::descriptor::{
    CommandInfo, ContainerInfo, ExecutorInfo, LaunchTarget, TaskInfo,
};
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::{
    AgentId, ContainerId, ExecutorId, FrameworkId, ResourceStatistics, Resources, TaskId,
};
use dockvisor_containerizer::{DockerContainerizer, LaunchRequest};
use dockvisor_core::cgroup::Hierarchies;
use dockvisor_core::process::{ProcessControl, Signal};
use dockvisor_runtime::backend::{ContainerRuntime, DockerContainer, Image, RunRequest};
use dockvisor_runtime::fetcher::AssetFetcher;
use dockvisor_runtime::process::{ExecutorCommand, Handshake, Launcher, SpawnedExecutor};
use dockvisor_runtime::reaper::ProcessReaper;
use tokio::sync::{Notify, watch};

pub const AGENT: &str = "a1";
pub const FIRST_PID: u32 = 4242;

// ── Gate ─────────────────────────────────────────────────────────────

/// Holds calls passing through it while closed.
#[derive(Default)]
pub struct Gate {
    closed: AtomicBool,
    entered: Notify,
    opened: Notify,
}

impl Gate {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Resolves once a call is held at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the held call through and stops holding new ones.
    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.opened.notify_one();
    }

    async fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.opened.notified().await;
        }
    }
}

// ── Runtime ──────────────────────────────────────────────────────────

/// Records every command and answers from scripted state.
#[derive(Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<String>>,
    pub runs: Mutex<Vec<RunRequest>>,
    pub listed: Mutex<Vec<DockerContainer>>,
    pub inspect_pid: Mutex<Option<u32>>,
    pub fail_run: Mutex<Option<String>>,
    pub fail_stop: Mutex<Option<String>>,
    pub block_pull: AtomicBool,
    pub pulling: Notify,
    /// Holds `run` of the task container.
    pub run_gate: Gate,
    /// Holds `stop` of primary containers; helpers pass through.
    pub stop_gate: Gate,
}

impl MockRuntime {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull(&self, _directory: &Path, image: &str, _force: bool) -> Result<Image> {
        self.record(format!("pull {image}"));
        if self.block_pull.load(Ordering::SeqCst) {
            self.pulling.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(Image {
            name: image.into(),
            entrypoint: None,
        })
    }

    async fn run(&self, request: &RunRequest) -> Result<()> {
        self.record(format!("run {}", request.name));
        self.runs.lock().unwrap().push(request.clone());
        self.run_gate.pass().await;
        if let Some(message) = self.fail_run.lock().unwrap().clone() {
            return Err(DockvisorError::Runtime {
                command: "docker run".into(),
                message,
            });
        }
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<DockerContainer> {
        self.record(format!("inspect {name}"));
        Ok(DockerContainer {
            id: format!("id-{name}"),
            name: format!("/{name}"),
            pid: *self.inspect_pid.lock().unwrap(),
        })
    }

    async fn stop(&self, name: &str, _timeout: Duration, remove: bool) -> Result<()> {
        self.record(if remove {
            format!("stop+rm {name}")
        } else {
            format!("stop {name}")
        });
        if !name.ends_with(".executor") {
            self.stop_gate.pass().await;
        }
        if let Some(message) = self.fail_stop.lock().unwrap().clone() {
            return Err(DockvisorError::Runtime {
                command: "docker stop".into(),
                message,
            });
        }
        Ok(())
    }

    async fn rm(&self, name: &str, _force: bool) -> Result<()> {
        self.record(format!("rm {name}"));
        Ok(())
    }

    async fn ps(&self, _all: bool, prefix: Option<&str>) -> Result<Vec<DockerContainer>> {
        self.record("ps".into());
        let listed = self.listed.lock().unwrap().clone();
        Ok(listed
            .into_iter()
            .filter(|c| prefix.is_none_or(|p| c.name.trim_start_matches('/').starts_with(p)))
            .collect())
    }

    async fn logs(&self, name: &str, _directory: &Path) -> Result<()> {
        self.record(format!("logs {name}"));
        Ok(())
    }
}

// ── Fetcher ──────────────────────────────────────────────────────────

/// Succeeds immediately unless told to fail or to block until killed.
#[derive(Default)]
pub struct MockFetcher {
    pub fail: Mutex<Option<String>>,
    pub block: AtomicBool,
    pub fetching: Notify,
    killed: Notify,
    pub kills: Mutex<Vec<ContainerId>>,
    /// Holds every fetch until opened.
    pub gate: Gate,
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(
        &self,
        _id: &ContainerId,
        _command: &CommandInfo,
        _directory: &Path,
        _user: Option<&str>,
    ) -> Result<()> {
        self.gate.pass().await;
        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(DockvisorError::Fetch {
                uri: "http://assets/app.tgz".into(),
                message,
            });
        }
        if self.block.load(Ordering::SeqCst) {
            self.fetching.notify_one();
            self.killed.notified().await;
            return Err(DockvisorError::Fetch {
                uri: "http://assets/app.tgz".into(),
                message: "fetch was killed".into(),
            });
        }
        Ok(())
    }

    fn kill(&self, id: &ContainerId) {
        self.kills.lock().unwrap().push(id.clone());
        self.killed.notify_one();
    }
}

// ── Reaper ───────────────────────────────────────────────────────────

/// Processes exit when the test says so.
#[derive(Default)]
pub struct MockReaper {
    exits: Mutex<HashMap<u32, watch::Sender<Option<i32>>>>,
    pub reaped: Mutex<Vec<u32>>,
}

impl MockReaper {
    fn channel(&self, pid: u32) -> watch::Receiver<Option<i32>> {
        self.exits
            .lock()
            .unwrap()
            .entry(pid)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Makes `pid` exit with the raw wait status `status`.
    pub fn exit(&self, pid: u32, status: i32) {
        let _ = self.channel(pid);
        let exits = self.exits.lock().unwrap();
        let _ = exits[&pid].send_replace(Some(status));
    }
}

#[async_trait]
impl ProcessReaper for MockReaper {
    async fn reap(&self, pid: u32) -> Option<i32> {
        self.reaped.lock().unwrap().push(pid);
        let mut exit = self.channel(pid);
        let status = exit.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        status
    }
}

// ── Launcher ─────────────────────────────────────────────────────────

/// Hands out increasing pids instead of forking.
pub struct MockLauncher {
    next_pid: AtomicU32,
    pub executors: Mutex<Vec<ExecutorCommand>>,
    pub waits: Mutex<Vec<String>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(FIRST_PID),
            executors: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
        }
    }
}

impl Launcher for MockLauncher {
    fn spawn_executor(&self, command: &ExecutorCommand) -> Result<SpawnedExecutor> {
        self.executors.lock().unwrap().push(command.clone());
        Ok(SpawnedExecutor {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            handshake: Handshake::none(),
        })
    }

    fn spawn_wait_process(&self, _docker: &str, name: &str) -> Result<u32> {
        self.waits.lock().unwrap().push(name.into());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}

// ── Host ─────────────────────────────────────────────────────────────

/// A host whose processes and cgroups are scripted.
#[derive(Default)]
pub struct MockHost {
    pub alive: Mutex<HashSet<u32>>,
    pub signals: Mutex<Vec<(u32, Signal)>>,
    pub cgroup: Mutex<Option<String>>,
    pub usage: Mutex<ResourceStatistics>,
}

impl ProcessControl for MockHost {
    fn exists(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    fn killtree(&self, pid: u32, signal: Signal) -> Result<Vec<u32>> {
        self.signals.lock().unwrap().push((pid, signal));
        Ok(vec![pid])
    }

    fn usage(&self, _pid: u32) -> Result<ResourceStatistics> {
        Ok(self.usage.lock().unwrap().clone())
    }

    fn cgroup(&self, _pid: u32, _subsystem: &str) -> Result<Option<String>> {
        Ok(self.cgroup.lock().unwrap().clone())
    }
}

// ── Harness ──────────────────────────────────────────────────────────

/// A containerizer wired to mocks, with scratch work and sandbox roots.
pub struct Harness {
    pub containerizer: DockerContainerizer,
    pub runtime: Arc<MockRuntime>,
    pub fetcher: Arc<MockFetcher>,
    pub reaper: Arc<MockReaper>,
    pub launcher: Arc<MockLauncher>,
    pub host: Arc<MockHost>,
    pub flags: Flags,
    pub work: tempfile::TempDir,
    pub sandboxes: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|_| {}, Hierarchies::from_paths(None, None))
    }

    pub fn with_flags(configure: impl FnOnce(&mut Flags)) -> Self {
        Self::build(configure, Hierarchies::from_paths(None, None))
    }

    pub fn build(configure: impl FnOnce(&mut Flags), hierarchies: Hierarchies) -> Self {
        let work = tempfile::tempdir().expect("work dir");
        let sandboxes = tempfile::tempdir().expect("sandboxes");
        let mut flags = Flags {
            work_dir: work.path().to_path_buf(),
            launcher_dir: PathBuf::from("/opt/dockvisor"),
            docker_remove_delay: Duration::ZERO,
            ..Flags::default()
        };
        configure(&mut flags);

        let runtime = Arc::new(MockRuntime::default());
        let fetcher = Arc::new(MockFetcher::default());
        let reaper = Arc::new(MockReaper::default());
        let launcher = Arc::new(MockLauncher::default());
        let host = Arc::new(MockHost::default());

        let containerizer = DockerContainerizer::builder(flags.clone())
            .runtime(runtime.clone())
            .fetcher(fetcher.clone())
            .reaper(reaper.clone())
            .launcher(launcher.clone())
            .host(host.clone())
            .hierarchies(hierarchies)
            .build()
            .expect("containerizer");

        Self {
            containerizer,
            runtime,
            fetcher,
            reaper,
            launcher,
            host,
            flags,
            work,
            sandboxes,
        }
    }

    fn sandbox(&self, id: &str) -> PathBuf {
        let dir = self.sandboxes.path().join(id);
        std::fs::create_dir_all(&dir).expect("sandbox");
        dir
    }

    /// A task in a `busybox` container, supervised by a forked executor.
    pub fn task(&self, id: &str) -> LaunchRequest {
        LaunchRequest {
            id: ContainerId::new(id),
            target: LaunchTarget::Task {
                task: TaskInfo {
                    task_id: TaskId::new("t1"),
                    name: "sleeper".into(),
                    command: Some(CommandInfo::shell("sleep 1000")),
                    container: Some(ContainerInfo::docker("busybox")),
                    resources: Resources::new(1.0, 128 << 20),
                },
                executor: executor(None),
            },
            directory: self.sandbox(id),
            user: None,
            agent_id: AgentId::new(AGENT),
            agent_address: "127.0.0.1:5051".into(),
            checkpoint: true,
        }
    }

    /// An executor that is itself a `busybox` container.
    pub fn executor(&self, id: &str) -> LaunchRequest {
        LaunchRequest {
            target: LaunchTarget::Executor(executor(Some(ContainerInfo::docker("busybox")))),
            ..self.task(id)
        }
    }

    /// Where the supervising pid of `id` is checkpointed.
    pub fn forked_pid_path(&self, id: &str) -> PathBuf {
        self.flags
            .meta_dir()
            .join("agents")
            .join(AGENT)
            .join("frameworks/f1/executors/e1/runs")
            .join(id)
            .join("pids/forked.pid")
    }
}

pub fn executor(container: Option<ContainerInfo>) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: ExecutorId::new("e1"),
        framework_id: FrameworkId::new("f1"),
        name: Some("sleeper executor".into()),
        command: CommandInfo::shell("run-executor"),
        container,
        resources: Resources::new(0.1, 32 << 20),
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not reached in time");
}
