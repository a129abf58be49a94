//! Integration tests for supervisor shutdown and child termination.

#![cfg(unix)]

use std::time::{Duration, Instant};

use serde_json::json;

use mcp_relay::AppError;

use super::test_helpers::{process_alive, sh_config, start_ready, wait_until, ECHO};

#[tokio::test]
async fn shutdown_rejects_pending_and_stops_child() {
    let supervisor = start_ready(sh_config("cat > /dev/null")).await;
    let pid = supervisor.pid().expect("pid");

    let pending = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.submit(json!({"id": "p", "method": "hang"})).await }
    });
    assert!(wait_until(|| supervisor.pending_count() == 1).await);

    supervisor.shutdown().await;

    let result = pending.await.expect("task joins");
    assert!(matches!(result, Err(AppError::ProcessExited(_))), "got {result:?}");
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.pid(), None);
    assert!(!process_alive(pid), "child must be reaped after shutdown");
}

#[tokio::test]
async fn supervisor_refuses_to_start_after_shutdown() {
    let supervisor = start_ready(sh_config(ECHO)).await;
    supervisor.shutdown().await;

    let result = supervisor.start();
    assert!(matches!(result, Err(AppError::NotReady(_))), "got {result:?}");
    let result = supervisor.submit(json!({"id": 1})).await;
    assert!(matches!(result, Err(AppError::NotReady(_))));
}

#[tokio::test]
async fn shutdown_without_child_is_a_no_op() {
    let supervisor = mcp_relay::bridge::Supervisor::new(sh_config(ECHO));
    supervisor.shutdown().await;
    supervisor.shutdown().await;
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn child_ignoring_sigterm_is_killed_after_grace() {
    let mut config = sh_config("trap '' TERM; while true; do sleep 0.05; done");
    config.shutdown_grace = Duration::from_millis(300);
    let supervisor = start_ready(config).await;
    let pid = supervisor.pid().expect("pid");

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
        .await
        .expect("shutdown must not hang");

    assert!(started.elapsed() >= Duration::from_millis(300), "grace period must be honoured");
    assert!(!process_alive(pid), "child must be killed");
}

#[tokio::test]
async fn dropping_last_handle_terminates_child() {
    let supervisor = start_ready(sh_config("cat > /dev/null")).await;
    let pid = supervisor.pid().expect("pid");

    drop(supervisor);

    assert!(
        wait_until(|| !process_alive(pid)).await,
        "child must not outlive its supervisor"
    );
}

#[tokio::test]
async fn shutdown_reaches_grandchildren() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!("sleep 300 & echo $! > '{}'; wait", pid_file.display());
    let supervisor = start_ready(sh_config(&script)).await;

    let grandchild = wait_for_pid_file(&pid_file).await;
    assert!(process_alive(grandchild));

    supervisor.shutdown().await;

    assert!(
        wait_until(|| !process_alive(grandchild)).await,
        "grandchild {grandchild} must not outlive shutdown"
    );
}

#[tokio::test]
async fn restart_retires_grandchildren_of_previous_child() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pid_file = dir.path().join("grandchild.pid");
    let script = format!(
        "[ -s '{path}' ] || {{ sleep 300 & echo $! > '{path}'; }}; wait; cat > /dev/null",
        path = pid_file.display()
    );
    let supervisor = start_ready(sh_config(&script)).await;
    let grandchild = wait_for_pid_file(&pid_file).await;

    supervisor.restart().await.expect("restart succeeds");

    assert!(
        wait_until(|| !process_alive(grandchild)).await,
        "grandchild {grandchild} of the retired child must be gone"
    );
    supervisor.shutdown().await;
}

async fn wait_for_pid_file(path: &std::path::Path) -> u32 {
    let mut pid = None;
    let found = wait_until(|| {
        pid = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        pid.is_some()
    })
    .await;
    assert!(found, "child never reported its grandchild pid");
    pid.expect("pid parsed")
}
