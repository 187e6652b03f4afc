//! Recovery of containers left behind by a previous agent.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::collections::HashMap;

use common::{AGENT, Harness, eventually, executor};
use dockvisor_common::error::DockvisorError;
use dockvisor_common::types::{AgentId, ContainerId, ExecutorId, FrameworkId};
use dockvisor_core::process::exited;
use dockvisor_runtime::backend::DockerContainer;
use dockvisor_runtime::state::{AgentState, ExecutorState, FrameworkState, RunState};

fn listed(name: &str, pid: Option<u32>) -> DockerContainer {
    DockerContainer {
        id: format!("id-{name}"),
        name: format!("/{name}"),
        pid,
    }
}

fn run(id: &str, pid: u32) -> RunState {
    RunState {
        id: ContainerId::new(id),
        forked_pid: Some(pid),
        completed: false,
    }
}

fn executor_state(id: &str, latest: RunState) -> ExecutorState {
    ExecutorState {
        id: ExecutorId::new(id),
        info: Some(executor(None)),
        latest: Some(latest.id.clone()),
        runs: HashMap::from([(latest.id.clone(), latest)]),
    }
}

fn agent(executors: Vec<ExecutorState>) -> AgentState {
    let framework = FrameworkState {
        id: FrameworkId::new("f1"),
        executors: executors.into_iter().map(|e| (e.id.clone(), e)).collect(),
    };
    let mut state = AgentState::new(AgentId::new(AGENT));
    let _ = state.frameworks.insert(framework.id.clone(), framework);
    state
}

// ── Reattach ─────────────────────────────────────────────────────────

#[tokio::test]
async fn live_executor_is_supervised_again() {
    let h = Harness::new();
    let id = ContainerId::new("c1");
    let _ = h.host.alive.lock().unwrap().insert(100);
    h.runtime
        .listed
        .lock()
        .unwrap()
        .push(listed("mesos-a1.c1", Some(50)));

    h.containerizer
        .recover(Some(agent(vec![executor_state("e1", run("c1", 100))])))
        .await
        .expect("recover");
    assert!(h.containerizer.containers().await.expect("containers").contains(&id));

    let wait = h.containerizer.wait(&id);
    h.reaper.exit(100, exited(3));
    let termination = wait.await.expect("wait");
    assert!(!termination.killed);
    assert_eq!(termination.message, "Container terminated");
    assert_eq!(termination.status, Some(exited(3)));
    assert_eq!(h.runtime.count("stop mesos-a1.c1"), 1);
    assert_eq!(h.runtime.count("stop+rm id-mesos-a1.c1"), 0);
}

#[tokio::test]
async fn dead_executor_with_running_helper_is_reattached() {
    let h = Harness::new();
    let id = ContainerId::new("c1");
    {
        let mut listed_containers = h.runtime.listed.lock().unwrap();
        listed_containers.push(listed("mesos-a1.c1", Some(50)));
        listed_containers.push(listed("mesos-a1.c1.executor", Some(51)));
    }

    h.containerizer
        .recover(Some(agent(vec![executor_state("e1", run("c1", 100))])))
        .await
        .expect("recover");

    assert_eq!(
        h.launcher.waits.lock().unwrap().clone(),
        vec!["id-mesos-a1.c1.executor".to_string()]
    );
    assert!(h.containerizer.containers().await.expect("containers").contains(&id));
    assert!(!h.runtime.calls().iter().any(|c| c.starts_with("stop+rm")));
}

#[tokio::test]
async fn completed_runtime_container_is_not_recovered() {
    let h = Harness::new();
    h.runtime
        .listed
        .lock()
        .unwrap()
        .push(listed("mesos-a1.c1", None));

    h.containerizer
        .recover(Some(agent(vec![executor_state("e1", run("c1", 100))])))
        .await
        .expect("recover");

    assert!(h.containerizer.containers().await.expect("containers").is_empty());
    eventually(|| h.runtime.count("stop+rm id-mesos-a1.c1") == 1).await;
}

#[tokio::test]
async fn running_container_without_executor_is_left_as_orphan() {
    let h = Harness::new();
    h.runtime
        .listed
        .lock()
        .unwrap()
        .push(listed("mesos-a1.c1", Some(50)));

    h.containerizer
        .recover(Some(agent(vec![executor_state("e1", run("c1", 100))])))
        .await
        .expect("recover");

    assert!(h.containerizer.containers().await.expect("containers").is_empty());
    assert!(h.launcher.waits.lock().unwrap().is_empty());
    eventually(|| h.runtime.count("stop+rm id-mesos-a1.c1") == 1).await;
}

// ── Skipped runs ─────────────────────────────────────────────────────

#[tokio::test]
async fn unrecoverable_executors_are_skipped() {
    let h = Harness::new();
    h.host.alive.lock().unwrap().extend([100, 101, 102, 103, 104]);

    let mut without_info = executor_state("e1", run("c1", 100));
    without_info.info = None;
    let mut completed = executor_state("e2", run("c2", 101));
    completed.runs.get_mut(&ContainerId::new("c2")).unwrap().completed = true;
    let _ = completed
        .runs
        .insert(ContainerId::new("c2-old"), run("c2-old", 104));
    let mut without_latest = executor_state("e3", run("c3", 102));
    without_latest.latest = None;
    let mut without_pid = executor_state("e4", run("c4", 103));
    without_pid
        .runs
        .get_mut(&ContainerId::new("c4"))
        .unwrap()
        .forked_pid = None;

    h.containerizer
        .recover(Some(agent(vec![
            without_info,
            completed,
            without_latest,
            without_pid,
        ])))
        .await
        .expect("recover");

    assert!(h.containerizer.containers().await.expect("containers").is_empty());
}

#[tokio::test]
async fn nothing_to_recover_without_state() {
    let h = Harness::new();
    h.containerizer.recover(None).await.expect("recover");
    assert!(h.runtime.calls().is_empty());
}

// ── Orphans ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unclaimed_containers_are_stopped() {
    let h = Harness::new();
    {
        let mut listed_containers = h.runtime.listed.lock().unwrap();
        listed_containers.push(listed("mesos-a1.c9", Some(90)));
        listed_containers.push(listed("mesos-a1.c9.executor", Some(91)));
        listed_containers.push(listed("redis", Some(92)));
    }

    h.containerizer
        .recover(Some(AgentState::new(AgentId::new(AGENT))))
        .await
        .expect("recover");

    eventually(|| {
        h.runtime.count("stop+rm id-mesos-a1.c9") == 1
            && h.runtime.count("stop+rm id-mesos-a1.c9.executor") == 1
    })
    .await;
    assert_eq!(h.runtime.count("stop+rm id-redis"), 0);
}

#[tokio::test]
async fn orphans_are_kept_when_not_configured_to_kill_them() {
    let h = Harness::with_flags(|flags| flags.docker_kill_orphans = false);
    h.runtime
        .listed
        .lock()
        .unwrap()
        .push(listed("mesos-a1.c9", Some(90)));

    h.containerizer
        .recover(Some(AgentState::new(AgentId::new(AGENT))))
        .await
        .expect("recover");

    tokio::task::yield_now().await;
    assert_eq!(h.runtime.calls(), ["ps"]);
}

// ── Failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_pids_fail_recovery() {
    let h = Harness::new();
    let _ = h.host.alive.lock().unwrap().insert(100);

    let err = h
        .containerizer
        .recover(Some(agent(vec![
            executor_state("e1", run("c1", 100)),
            executor_state("e2", run("c2", 100)),
        ])))
        .await
        .expect_err("duplicate pid");
    assert!(matches!(err, DockvisorError::DuplicatePid { pid: 100, .. }));

    let containers = h.containerizer.containers().await.expect("containers");
    assert_eq!(containers.len(), 1);
    assert!(containers.contains(&ContainerId::new("c1")));
}
