//! Integration tests for child start, readiness, restart and auto-restart.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;

use mcp_relay::bridge::spawner::SpawnConfig;
use mcp_relay::bridge::Supervisor;
use mcp_relay::AppError;

use super::test_helpers::{sh_config, start_ready, wait_ready, wait_until, ECHO, PONG};

#[tokio::test]
async fn submit_before_start_is_not_ready() {
    let supervisor = Supervisor::new(sh_config(ECHO));

    assert!(!supervisor.is_running());
    assert!(!supervisor.is_ready());
    assert_eq!(supervisor.pid(), None);

    let result = supervisor.submit(json!({"id": 1, "method": "ping"})).await;
    assert!(matches!(result, Err(AppError::NotReady(_))), "got {result:?}");
    assert_eq!(supervisor.pending_count(), 0, "nothing may be registered");
}

#[tokio::test]
async fn start_is_idempotent() {
    let supervisor = start_ready(sh_config(ECHO)).await;
    let pid = supervisor.pid().expect("child pid");

    supervisor.start().expect("second start is a no-op");
    assert_eq!(supervisor.pid(), Some(pid), "no second child may be spawned");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let mut config = sh_config(ECHO);
    config.spawn = SpawnConfig {
        command: "/nonexistent/mcp-relay-test-binary".into(),
        args: Vec::new(),
        working_dir: None,
    };
    let supervisor = Supervisor::new(config);

    let result = supervisor.start();
    assert!(matches!(result, Err(AppError::Spawn(_))), "got {result:?}");
    assert!(!supervisor.is_running());

    let result = supervisor.submit(json!({"method": "ping"})).await;
    assert!(matches!(result, Err(AppError::NotReady(_))));
}

#[tokio::test]
async fn silent_child_is_not_ready_during_warmup() {
    let mut config = sh_config(ECHO);
    config.warmup = Duration::from_secs(60);
    let supervisor = Supervisor::new(config);
    supervisor.start().expect("child spawns");

    assert!(supervisor.is_running());
    assert!(!supervisor.is_ready());
    let result = supervisor.submit(json!({"id": "early", "method": "ping"})).await;
    assert!(matches!(result, Err(AppError::NotReady(_))), "got {result:?}");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn silent_child_becomes_ready_after_warmup() {
    let supervisor = Supervisor::new(sh_config(ECHO));
    supervisor.start().expect("child spawns");
    wait_ready(&supervisor).await;

    let response = supervisor
        .submit(json!({"id": "w", "method": "ping"}))
        .await
        .expect("echoed");
    assert_eq!(response["id"], "w");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn first_output_marks_child_ready_before_warmup() {
    let mut config = sh_config(&format!("echo 'server starting'; {PONG}"));
    config.warmup = Duration::from_secs(60);
    let supervisor = Supervisor::new(config);
    supervisor.start().expect("child spawns");

    wait_ready(&supervisor).await;
    let response = supervisor
        .submit(json!({"jsonrpc": "2.0", "id": "p", "method": "ping"}))
        .await
        .expect("pong");
    assert_eq!(response["result"], "pong");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn restart_replaces_child_and_rejects_pending() {
    let supervisor = start_ready(sh_config("cat > /dev/null")).await;
    let old_pid = supervisor.pid().expect("pid");

    let pending = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.submit(json!({"id": "stuck", "method": "slow"})).await }
    });
    assert!(wait_until(|| supervisor.pending_count() == 1).await);

    supervisor.restart().await.expect("restart succeeds");

    let result = pending.await.expect("task joins");
    assert!(matches!(result, Err(AppError::ProcessExited(_))), "got {result:?}");

    let new_pid = supervisor.pid().expect("new pid");
    assert_ne!(old_pid, new_pid);
    assert!(!supervisor.is_ready(), "new child starts out not ready");
    wait_ready(&supervisor).await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unexpected_exit_triggers_auto_restart() {
    let mut config = sh_config("read line; exit 1");
    config.restart_delay = Some(Duration::from_millis(100));
    let supervisor = start_ready(config).await;
    let first_pid = supervisor.pid().expect("pid");

    let result = supervisor.submit(json!({"id": 1, "method": "boom"})).await;
    assert!(matches!(result, Err(AppError::ProcessExited(_))), "got {result:?}");

    assert!(
        wait_until(|| supervisor.pid().is_some_and(|pid| pid != first_pid)).await,
        "child was not respawned"
    );
    wait_ready(&supervisor).await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn exit_without_auto_restart_leaves_no_child() {
    let supervisor = start_ready(sh_config("read line; exit 0")).await;

    let result = supervisor.submit(json!({"id": 1, "method": "bye"})).await;
    assert!(matches!(result, Err(AppError::ProcessExited(_))));

    assert!(wait_until(|| !supervisor.is_running()).await);
    let result = supervisor.submit(json!({"id": 2, "method": "ping"})).await;
    assert!(matches!(result, Err(AppError::NotReady(_))), "got {result:?}");
}

#[tokio::test]
async fn response_printed_just_before_exit_is_delivered() {
    let supervisor = start_ready(sh_config(
        r#"read line; echo '{"jsonrpc":"2.0","id":"last","result":"bye"}'; exit 0"#,
    ))
    .await;

    let response = supervisor
        .submit(json!({"id": "last", "method": "quit"}))
        .await
        .expect("response delivered despite exit");
    assert_eq!(response["result"], "bye");
}
