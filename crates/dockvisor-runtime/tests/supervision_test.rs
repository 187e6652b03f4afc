//! Forking, checkpointing and reaping an executor the way the
//! containerizer does, against the real host.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use dockvisor_common::descriptor::{CommandInfo, ExecutorInfo};
use dockvisor_common::types::{AgentId, ContainerId, ExecutorId, FrameworkId, Resources};
use dockvisor_core::process::exited;
use dockvisor_runtime::logs;
use dockvisor_runtime::paths;
use dockvisor_runtime::process::{ExecutorCommand, HostLauncher, Launcher};
use dockvisor_runtime::reaper::{ProcessReaper, Reaper};
use dockvisor_runtime::state::{self, AgentState};

fn executor_info() -> ExecutorInfo {
    ExecutorInfo {
        executor_id: ExecutorId::new("e1"),
        framework_id: FrameworkId::new("f1"),
        name: Some("sleeper".into()),
        command: CommandInfo::shell("run-executor"),
        container: None,
        resources: Resources::new(0.1, 32 << 20),
    }
}

fn shell(script: &str, sandbox: &std::path::Path) -> ExecutorCommand {
    ExecutorCommand {
        program: PathBuf::from("/bin/sh"),
        arguments: vec!["-c".into(), script.into()],
        directory: sandbox.to_path_buf(),
        environment: BTreeMap::new(),
    }
}

// ── Checkpointed runs ────────────────────────────────────────────────

#[tokio::test]
async fn forked_executor_is_checkpointed_released_and_reaped() {
    let work = tempfile::tempdir().expect("work");
    let sandbox = tempfile::tempdir().expect("sandbox");
    let meta = work.path().join("meta");
    let agent = AgentId::new("a1");
    let run = ContainerId::new("c1");
    let info = executor_info();

    state::checkpoint_executor(&meta, &agent, &info, &run).expect("checkpoint executor");
    let spawned = HostLauncher
        .spawn_executor(&shell("head -c 1 >/dev/null && echo released && exit 4", sandbox.path()))
        .expect("spawn");

    let executor_dir = paths::executor_dir(&meta, &agent, &info.framework_id, &info.executor_id);
    let run_dir = paths::run_dir(&executor_dir, &run);
    state::checkpoint_pid(&paths::forked_pid_path(&run_dir), spawned.pid).expect("checkpoint pid");
    spawned.handshake.release().expect("release");

    let status = Reaper::default().reap(spawned.pid).await;
    assert_eq!(status, Some(exited(4)));
    let output = std::fs::read_to_string(logs::stdout_path(sandbox.path())).expect("stdout");
    assert_eq!(output, "released\n");

    let loaded = AgentState::load(&meta, &agent)
        .expect("load")
        .expect("state exists");
    let executor = &loaded.frameworks[&info.framework_id].executors[&info.executor_id];
    assert_eq!(executor.info.as_ref(), Some(&info));
    assert_eq!(executor.latest.as_ref(), Some(&run));
    assert_eq!(executor.runs[&run].forked_pid, Some(spawned.pid));
    assert!(!executor.runs[&run].completed);

    state::mark_completed(&run_dir).expect("complete");
    let loaded = AgentState::load(&meta, &agent)
        .expect("load")
        .expect("state exists");
    assert!(loaded.frameworks[&info.framework_id].executors[&info.executor_id].runs[&run].completed);
}

#[tokio::test]
async fn relaunched_executor_moves_the_latest_run() {
    let work = tempfile::tempdir().expect("work");
    let meta = work.path().join("meta");
    let agent = AgentId::new("a1");
    let info = executor_info();

    let first = ContainerId::new("c1");
    let second = ContainerId::new("c2");
    state::checkpoint_executor(&meta, &agent, &info, &first).expect("first run");
    state::checkpoint_executor(&meta, &agent, &info, &second).expect("second run");

    let loaded = AgentState::load(&meta, &agent)
        .expect("load")
        .expect("state exists");
    let executor = &loaded.frameworks[&info.framework_id].executors[&info.executor_id];
    assert_eq!(executor.latest.as_ref(), Some(&second));
    assert_eq!(executor.runs.len(), 2);
    assert!(executor.runs.values().all(|run| run.forked_pid.is_none()));
}

// ── Handshake failures ───────────────────────────────────────────────

#[tokio::test]
async fn executor_abandoned_before_checkpoint_exits_on_its_own() {
    let sandbox = tempfile::tempdir().expect("sandbox");
    let spawned = HostLauncher
        .spawn_executor(&shell("head -c 1 | grep -q . || exit 9", sandbox.path()))
        .expect("spawn");

    spawned.handshake.abort();
    assert_eq!(Reaper::default().reap(spawned.pid).await, Some(exited(9)));
}
