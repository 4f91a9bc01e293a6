#![cfg(unix)]

use script_runner_bot::config::{ScriptDefinition, ScriptTable};
use script_runner_bot::error::{LaunchError, StatusError, TerminateError, TerminationIssue};
use script_runner_bot::process::{
    Notification, NotificationReceiver, ProcessManager, ProcessTerminator, SysinfoTerminator,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const LOOP_SCRIPT: &str = "#!/bin/sh\nwhile true; do echo tick; sleep 0.2; done\n";

fn write_script(dir: &Path, file_name: &str, body: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn definition(name: &str, path: PathBuf) -> ScriptDefinition {
    ScriptDefinition {
        name: name.to_string(),
        executable_path: path,
        description: format!("{} script", name),
    }
}

fn table(scripts: Vec<ScriptDefinition>) -> ScriptTable {
    ScriptTable::new(scripts).unwrap()
}

/// Polls `manager` until `name` reaches the wanted running state.
async fn wait_for_running(manager: &ProcessManager, name: &str, running: bool) -> bool {
    for _ in 0..100 {
        if manager.is_running(name).await == running {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn next_notification(rx: &mut NotificationReceiver) -> Option<Notification> {
    timeout(Duration::from_secs(10), rx.recv()).await.ok().flatten()
}

/// Records every kill request, optionally forwarding it to the real backend.
#[derive(Debug, Default)]
struct RecordingTerminator {
    calls: Mutex<Vec<(u32, bool)>>,
    forward: bool,
    fail: bool,
}

impl RecordingTerminator {
    fn forwarding() -> Self {
        Self {
            forward: true,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ProcessTerminator for RecordingTerminator {
    fn terminate(&self, pid: u32, include_children: bool) -> Result<(), TerminationIssue> {
        self.calls.lock().unwrap().push((pid, include_children));
        if self.fail {
            return Err(TerminationIssue::SignalFailed {
                pid,
                reason: "simulated failure".to_string(),
            });
        }
        if self.forward {
            // A second request may race the first kill; a vanished pid is fine here.
            let _ = SysinfoTerminator.terminate(pid, include_children);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_second_launch_is_rejected_while_running() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "build.sh", LOOP_SCRIPT);
    let manager = ProcessManager::new(table(vec![definition("build", script)]));

    let outcome = manager.launch("build", None).await.unwrap();
    assert_eq!(outcome.name, "build");

    let err = manager.launch("build", None).await.unwrap_err();
    assert_eq!(err, LaunchError::AlreadyRunning("build".to_string()));

    let statuses = manager.status().await.unwrap();
    assert_eq!(statuses[0].pid, Some(outcome.pid));
    assert_eq!(manager.running_count().await, 1);

    manager.terminate("build").await.unwrap();
    assert!(wait_for_running(&manager, "build", false).await);
}

#[tokio::test]
async fn test_status_without_configured_scripts() {
    let manager = ProcessManager::new(ScriptTable::default());
    assert_eq!(manager.status().await.unwrap_err(), StatusError::NoScriptsConfigured);
}

#[tokio::test]
async fn test_spawn_failure_leaves_other_scripts_alone() {
    let dir = TempDir::new().unwrap();
    let ok = write_script(dir.path(), "ok.sh", LOOP_SCRIPT);
    let bad = dir.path().join("missing").join("bad.sh");
    let manager = ProcessManager::new(table(vec![definition("ok", ok), definition("bad", bad)]));

    let started = manager.launch("ok", None).await.unwrap();
    let err = manager.launch("bad", None).await.unwrap_err();
    assert!(matches!(err, LaunchError::SpawnFailed { ref name, .. } if name == "bad"), "{:?}", err);

    let statuses = manager.status().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].name, "ok");
    assert!(statuses[0].is_running);
    assert_eq!(statuses[0].pid, Some(started.pid));
    assert_eq!(statuses[1].name, "bad");
    assert!(!statuses[1].is_running);
    assert_eq!(statuses[1].pid_display(), "N/A");

    manager.terminate("ok").await.unwrap();
    assert!(wait_for_running(&manager, "ok", false).await);
}

#[tokio::test]
async fn test_terminate_delivers_one_notification() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "build.sh", LOOP_SCRIPT);
    let manager = ProcessManager::new(table(vec![definition("build", script)]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.launch("build", Some(tx)).await.unwrap();
    manager.terminate("build").await.unwrap();

    let notification = next_notification(&mut rx).await.expect("termination notification");
    assert_eq!(
        notification,
        Notification::Exited {
            script_name: "build".to_string(),
            code: None,
            signal: Some(9),
        }
    );
    assert!(!manager.is_running("build").await);

    // The entry held the only sender; the channel closes after the single notification.
    assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), None);

    let statuses = manager.status().await.unwrap();
    assert!(!statuses[0].is_running);
}

#[tokio::test]
async fn test_natural_exit_reports_exit_code() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "fail.sh", "#!/bin/sh\necho starting\necho oops >&2\nexit 3\n");
    let manager = ProcessManager::new(table(vec![definition("fail", script)]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.launch("fail", Some(tx)).await.unwrap();

    let notification = next_notification(&mut rx).await.expect("exit notification");
    assert_eq!(
        notification,
        Notification::Exited {
            script_name: "fail".to_string(),
            code: Some(3),
            signal: None,
        }
    );
    assert!(!manager.is_running("fail").await);

    // A finished script can be started again.
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.launch("fail", Some(tx)).await.unwrap();
    assert!(next_notification(&mut rx).await.is_some());
}

#[tokio::test]
async fn test_background_child_does_not_keep_entry_alive() {
    let dir = TempDir::new().unwrap();
    // The backgrounded sleep inherits the script's stdout and stderr pipes.
    let script = write_script(dir.path(), "detach.sh", "#!/bin/sh\nsleep 6 &\necho launched\nexit 0\n");
    let manager = ProcessManager::new(table(vec![definition("detach", script)]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.launch("detach", Some(tx)).await.unwrap();

    let notification = timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("exit observed while the background child still holds the pipes")
        .expect("exit notification");
    assert_eq!(
        notification,
        Notification::Exited {
            script_name: "detach".to_string(),
            code: Some(0),
            signal: None,
        }
    );
    assert!(!manager.is_running("detach").await);
    assert_eq!(
        manager.terminate("detach").await.unwrap_err(),
        TerminateError::NotRunning("detach".to_string())
    );
}

#[tokio::test]
async fn test_script_runs_in_its_own_directory() {
    let dir = TempDir::new().unwrap();
    let jobs = dir.path().join("jobs");
    std::fs::create_dir(&jobs).unwrap();
    let script = write_script(&jobs, "where.sh", "#!/bin/sh\npwd -P > cwd.txt\n");
    let manager = ProcessManager::new(table(vec![definition("where", script)]));
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.launch("where", Some(tx)).await.unwrap();
    next_notification(&mut rx).await.expect("exit notification");

    let cwd = std::fs::read_to_string(jobs.join("cwd.txt")).unwrap();
    assert_eq!(PathBuf::from(cwd.trim()), jobs.canonicalize().unwrap());
}

#[tokio::test]
async fn test_unknown_script_never_touches_registry() {
    let terminator = Arc::new(RecordingTerminator::default());
    let manager = ProcessManager::with_terminator(ScriptTable::default(), terminator.clone());

    assert_eq!(
        manager.launch("ghost", None).await.unwrap_err(),
        LaunchError::UnknownScript("ghost".to_string())
    );
    assert_eq!(
        manager.terminate("ghost").await.unwrap_err(),
        TerminateError::UnknownScript("ghost".to_string())
    );
    assert_eq!(manager.running_count().await, 0);
    assert_eq!(terminator.call_count(), 0);
}

#[tokio::test]
async fn test_terminate_idle_script_issues_no_kill() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "build.sh", LOOP_SCRIPT);
    let terminator = Arc::new(RecordingTerminator::forwarding());
    let manager = ProcessManager::with_terminator(table(vec![definition("build", script)]), terminator.clone());

    assert_eq!(
        manager.terminate("build").await.unwrap_err(),
        TerminateError::NotRunning("build".to_string())
    );
    sleep(Duration::from_millis(100)).await;
    assert_eq!(terminator.call_count(), 0);
}

#[tokio::test]
async fn test_double_terminate_sends_two_requests_and_one_notification() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "build.sh", LOOP_SCRIPT);
    let terminator = Arc::new(RecordingTerminator::forwarding());
    let manager = ProcessManager::with_terminator(table(vec![definition("build", script)]), terminator.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = manager.launch("build", Some(tx)).await.unwrap();
    manager.terminate("build").await.unwrap();
    // The first kill may already have been observed; only a still-registered script accepts a second request.
    let second = manager.terminate("build").await;
    assert!(matches!(second, Ok(()) | Err(TerminateError::NotRunning(_))));

    assert!(next_notification(&mut rx).await.is_some());
    assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap(), None);
    assert!(!manager.is_running("build").await);

    let expected_calls = if second.is_ok() { 2 } else { 1 };
    for _ in 0..100 {
        if terminator.call_count() == expected_calls {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let calls = terminator.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), expected_calls);
    assert!(calls.iter().all(|&(pid, children)| pid == outcome.pid && children));
}

#[tokio::test]
async fn test_failed_kill_request_leaves_entry_in_place() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 1\n");
    let terminator = Arc::new(RecordingTerminator::failing());
    let manager = ProcessManager::with_terminator(table(vec![definition("slow", script)]), terminator.clone());

    manager.launch("slow", None).await.unwrap();
    manager.terminate("slow").await.unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(terminator.call_count(), 1);
    assert!(manager.is_running("slow").await);

    // The entry goes away only once the process exits on its own.
    assert!(wait_for_running(&manager, "slow", false).await);
}

#[tokio::test]
async fn test_concurrent_launches_start_one_process() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "build.sh", LOOP_SCRIPT);
    let manager = Arc::new(ProcessManager::new(table(vec![definition("build", script)])));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move { manager.launch("build", None).await }));
    }

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(e) => assert_eq!(e, LaunchError::AlreadyRunning("build".to_string())),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(manager.running_count().await, 1);

    manager.terminate_all().await;
    assert!(wait_for_running(&manager, "build", false).await);
}

#[tokio::test]
async fn test_names_sharing_a_path_run_side_by_side() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "shared.sh", LOOP_SCRIPT);
    let manager = ProcessManager::new(table(vec![
        definition("first", script.clone()),
        definition("second", script),
    ]));

    let a = manager.launch("first", None).await.unwrap();
    let b = manager.launch("second", None).await.unwrap();
    assert_ne!(a.pid, b.pid);
    assert_eq!(manager.running_count().await, 2);

    let mut requested = manager.terminate_all().await;
    requested.sort();
    assert_eq!(requested, vec!["first".to_string(), "second".to_string()]);
    assert!(wait_for_running(&manager, "first", false).await);
    assert!(wait_for_running(&manager, "second", false).await);
}
