//! Lifecycle tests against real detached processes

use std::time::Duration;

use procwatch::{ProcessConfig, ProcessHandle, ProcessState, ProcessTable};
use serial_test::serial;
use tokio::time::sleep;

const SETTLE: Duration = Duration::from_millis(300);
const GRACE: Duration = Duration::from_millis(100);

fn sh(script: &str) -> ProcessConfig {
    ProcessConfig::new("sh").args(["-c", script])
}

/// Pids of processes whose argv is exactly `cmd`
fn pids_running(cmd: &[&str]) -> Vec<u32> {
    ProcessTable::snapshot()
        .entries()
        .iter()
        .filter(|entry| entry.cmd.iter().map(String::as_str).eq(cmd.iter().copied()))
        .map(|entry| entry.pid)
        .collect()
}

#[tokio::test]
#[serial]
async fn test_alive_for_duration_of_command() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("sleep").args(["1"])).unwrap();

    sleep(SETTLE).await;
    assert!(handle.is_alive());
    assert_eq!(handle.state(), ProcessState::Running);
    assert!(handle.pid().is_some());

    sleep(Duration::from_millis(1500)).await;
    assert!(!handle.is_alive());
    assert_eq!(handle.state(), ProcessState::Exited);
    assert!(handle.pid().is_none());
}

#[tokio::test]
#[serial]
async fn test_kill_removes_process_and_descendants() {
    let mut handle = ProcessHandle::new(sh("sleep 317 & sleep 318; wait")).unwrap();

    sleep(SETTLE).await;
    assert!(handle.is_alive());
    assert_eq!(pids_running(&["sleep", "317"]).len(), 1);
    assert_eq!(pids_running(&["sleep", "318"]).len(), 1);

    handle.kill(GRACE).await;

    assert!(!handle.is_alive());
    assert_eq!(handle.state(), ProcessState::Killed);
    let report = handle.last_kill().unwrap();
    assert!(report.descendants.len() >= 3);

    sleep(SETTLE).await;
    assert!(pids_running(&["sleep", "317"]).is_empty());
    assert!(pids_running(&["sleep", "318"]).is_empty());
}

#[tokio::test]
#[serial]
async fn test_kill_on_dead_handle_is_noop() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("true")).unwrap();
    handle.wait().await.unwrap();

    handle.kill(GRACE).await.kill(GRACE).await;
    assert!(!handle.is_alive());
    assert!(handle.last_kill().is_none());
    assert_eq!(handle.state(), ProcessState::Exited);
}

#[tokio::test]
#[serial]
async fn test_restart_after_kill_gets_new_pid() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("sleep").args(["30"])).unwrap();
    sleep(SETTLE).await;
    assert!(handle.is_alive());
    let old_pid = handle.pid().unwrap();
    let old_token = handle.token().clone();

    handle.kill(GRACE).await;
    assert!(!handle.is_alive());

    handle.restart().await.unwrap();
    sleep(SETTLE).await;
    assert!(handle.is_alive());
    assert_ne!(handle.pid().unwrap(), old_pid);
    assert_ne!(handle.token(), &old_token);
    assert!(handle.exit_status().is_none());

    handle.kill(GRACE).await;
    assert!(!handle.is_alive());
}

#[tokio::test]
#[serial]
async fn test_restart_kills_running_incarnation() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("sleep").args(["319"])).unwrap();
    sleep(SETTLE).await;
    let old_pid = handle.pid().unwrap();

    handle.restart().await.unwrap();
    sleep(SETTLE).await;

    assert!(!ProcessTable::snapshot().contains(old_pid));
    assert_eq!(pids_running(&["sleep", "319"]).len(), 1);

    handle.kill(GRACE).await;
    sleep(SETTLE).await;
    assert!(pids_running(&["sleep", "319"]).is_empty());
}

#[tokio::test]
async fn test_wait_on_finished_process_returns_immediately() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("true")).unwrap();
    sleep(SETTLE).await;

    tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("first wait hung")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("second wait hung")
        .unwrap();
}

#[tokio::test]
async fn test_exit_status_only_after_wait() {
    let mut handle = ProcessHandle::new(sh("exit 3")).unwrap();
    sleep(SETTLE).await;

    // Already finished, but nobody waited
    assert!(!handle.is_alive());
    assert_eq!(handle.exit_status(), None);

    handle.wait().await.unwrap();
    assert_eq!(handle.exit_status(), Some(3));
}

#[tokio::test]
async fn test_exit_status_absent_while_running() {
    let mut handle = ProcessHandle::new(sh("sleep 1; exit 0")).unwrap();
    assert!(handle.is_alive());
    assert_eq!(handle.exit_status(), None);

    handle.wait().await.unwrap();
    assert_eq!(handle.exit_status(), Some(0));
}

#[tokio::test]
#[serial]
async fn test_wait_timeout_elapses_on_long_process() {
    let config = ProcessConfig::new("sleep")
        .args(["30"])
        .wait_timeout(Duration::from_millis(300));
    let mut handle = ProcessHandle::new(config).unwrap();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, procwatch::ProcessError::Timeout { millis: 300 }));
    assert!(handle.exit_status().is_none());

    handle.kill(GRACE).await;
    handle.wait().await.unwrap();
    assert!(handle.exit_status().is_some());
}

#[tokio::test]
async fn test_working_dir_and_env_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let config = sh("test \"$(pwd -P)\" = \"$EXPECTED\"")
        .working_dir(dir.path())
        .env(
            "EXPECTED",
            dir.path().canonicalize().unwrap().to_string_lossy(),
        );

    let mut handle = ProcessHandle::new(config).unwrap();
    handle.wait().await.unwrap();
    assert_eq!(handle.exit_status(), Some(0));
}

#[tokio::test]
async fn test_drop_removes_scratch_dir() {
    let mut handle = ProcessHandle::new(ProcessConfig::new("true")).unwrap();
    handle.wait().await.unwrap();
    let scratch = handle.scratch_dir().to_path_buf();
    assert!(scratch.exists());

    drop(handle);
    assert!(!scratch.exists());
}
