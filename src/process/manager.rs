//! Launch, monitor and terminate configured scripts.

use crate::config::{ScriptDefinition, ScriptTable};
use crate::error::{LaunchError, StatusError, TerminateError};
use crate::process::events::{Notification, NotificationSender, OutputStream, ProcessEvent};
use crate::process::registry::{ManagedProcess, ProcessRegistry, ProcessState};
use crate::process::terminator::{ProcessTerminator, SysinfoTerminator};
use crate::utils::path_utils::working_dir_for;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::{ExitStatus, Stdio as StdProcessStdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How long output readers may keep draining after the script itself exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    pub name: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStatus {
    pub name: String,
    pub description: String,
    pub is_running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ScriptStatus {
    /// The pid as shown to users, `N/A` when stopped.
    pub fn pid_display(&self) -> String {
        self.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "N/A".to_string())
    }
}

#[derive(Debug)]
pub struct ProcessManager {
    scripts: Arc<ScriptTable>,
    registry: Arc<TokioMutex<ProcessRegistry>>,
    terminator: Arc<dyn ProcessTerminator>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessManager {
    /// Creates a manager using the signal-based terminator. Must be called inside a Tokio runtime.
    pub fn new(scripts: ScriptTable) -> Self {
        Self::with_terminator(scripts, Arc::new(SysinfoTerminator))
    }

    pub fn with_terminator(scripts: ScriptTable, terminator: Arc<dyn ProcessTerminator>) -> Self {
        let registry = Arc::new(TokioMutex::new(ProcessRegistry::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_event_loop(registry.clone(), events_rx));

        Self {
            scripts: Arc::new(scripts),
            registry,
            terminator,
            events_tx,
        }
    }

    pub fn scripts(&self) -> &ScriptTable {
        &self.scripts
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.registry.lock().await.contains(name)
    }

    pub async fn running_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    #[instrument(skip(self, notifier), fields(script = %name))]
    pub async fn launch(&self, name: &str, notifier: Option<NotificationSender>) -> Result<LaunchOutcome, LaunchError> {
        let script = self
            .scripts
            .get(name)
            .ok_or_else(|| LaunchError::UnknownScript(name.to_string()))?;

        // Held across check, spawn and insert so two launches cannot interleave.
        let mut registry = self.registry.lock().await;
        if registry.contains(name) {
            warn!(script = %name, "Launch rejected, script is already running");
            return Err(LaunchError::AlreadyRunning(name.to_string()));
        }

        let mut child = spawn_script(script)?;
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                error!(script = %name, "Spawned process has no identifier");
                return Err(LaunchError::SpawnFailed {
                    name: name.to_string(),
                    reason: "the OS returned no process identifier".to_string(),
                });
            }
        };

        let process = ManagedProcess::new(name, pid, notifier);
        let launch_id = process.launch_id;
        if let Err(e) = registry.insert(name, process) {
            if let Err(kill_err) = child.kill().await {
                error!(script = %name, pid, error = %kill_err, "Failed to kill unregistered process");
            }
            return Err(e.into());
        }
        drop(registry);

        self.spawn_observers(name, launch_id, pid, child);
        info!(script = %name, pid, path = %script.executable_path.display(), "Script started");

        Ok(LaunchOutcome {
            name: name.to_string(),
            pid,
        })
    }

    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<Vec<ScriptStatus>, StatusError> {
        if self.scripts.is_empty() {
            return Err(StatusError::NoScriptsConfigured);
        }

        let registry = self.registry.lock().await;
        let statuses = registry
            .list_all(self.scripts.names())
            .zip(self.scripts.iter())
            .map(|((name, entry), script)| ScriptStatus {
                name: name.to_string(),
                description: script.description.clone(),
                is_running: entry.is_some(),
                pid: entry.map(|p| p.pid),
                started_at: entry.map(|p| p.started_at),
            })
            .collect();
        Ok(statuses)
    }

    /// Requests a forceful kill and returns without waiting for the process to die.
    ///
    /// The registry entry is removed by the process's own exit observer. If the
    /// kill request cannot be issued the failure is only logged and the entry
    /// stays in place.
    #[instrument(skip(self), fields(script = %name))]
    pub async fn terminate(&self, name: &str) -> Result<(), TerminateError> {
        if self.scripts.get(name).is_none() {
            return Err(TerminateError::UnknownScript(name.to_string()));
        }

        let pid = self
            .registry
            .lock()
            .await
            .get(name)
            .map(|p| p.pid)
            .ok_or_else(|| TerminateError::NotRunning(name.to_string()))?;

        info!(script = %name, pid, "Requesting script termination");
        let terminator = self.terminator.clone();
        let script_name = name.to_string();
        tokio::task::spawn_blocking(move || match terminator.terminate(pid, true) {
            Ok(()) => debug!(script = %script_name, pid, "Kill request delivered"),
            Err(e) => error!(script = %script_name, pid, error = %e, "Failed to terminate script process"),
        });
        Ok(())
    }

    /// Requests termination of every running script, returning their names.
    pub async fn terminate_all(&self) -> Vec<String> {
        let running: Vec<String> = {
            let registry = self.registry.lock().await;
            registry
                .list_all(self.scripts.names())
                .filter(|(_, entry)| entry.is_some())
                .map(|(name, _)| name.to_string())
                .collect()
        };

        let mut requested = Vec::with_capacity(running.len());
        for name in running {
            match self.terminate(&name).await {
                Ok(()) => requested.push(name),
                Err(e) => debug!(script = %name, error = %e, "Skipping termination"),
            }
        }
        requested
    }

    fn spawn_observers(&self, name: &str, launch_id: Uuid, pid: u32, mut child: Child) {
        let events = self.events_tx.clone();
        let script_name = name.to_string();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, script_name.clone(), pid, OutputStream::Stdout, events.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, script_name.clone(), pid, OutputStream::Stderr, events.clone())));

        tokio::spawn(async move {
            let state = match child.wait().await {
                Ok(status) => ProcessState::Exited {
                    code: status.code(),
                    signal: exit_signal(&status),
                },
                Err(e) => ProcessState::Failed(e.to_string()),
            };

            // Background children may inherit the pipes; give the readers a short
            // window to drain, then stop them so termination is the last event.
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                drain_reader(task).await;
            }

            let _ = events.send(ProcessEvent::Terminated {
                script_name,
                launch_id,
                pid,
                state,
            });
        });
    }
}

fn spawn_script(script: &ScriptDefinition) -> Result<Child, LaunchError> {
    let mut command = TokioCommand::new(&script.executable_path);
    command.current_dir(working_dir_for(&script.executable_path));
    command.stdin(StdProcessStdio::null());
    command.stdout(StdProcessStdio::piped());
    command.stderr(StdProcessStdio::piped());

    debug!(script = %script.name, path = %script.executable_path.display(), "Spawning script");
    command.spawn().map_err(|e| {
        error!(script = %script.name, error = %e, "Failed to spawn script");
        LaunchError::SpawnFailed {
            name: script.name.clone(),
            reason: e.to_string(),
        }
    })
}

async fn drain_reader(mut task: JoinHandle<()>) {
    if timeout(OUTPUT_DRAIN, &mut task).await.is_err() {
        debug!("Output reader still open after exit, stopping it");
        task.abort();
    }
}

/// Trims a raw output line. Blank lines yield `None`.
pub(crate) fn output_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn forward_lines<R>(
    reader: R,
    script_name: String,
    pid: u32,
    stream: OutputStream,
    events: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let Some(line) = output_line(&buf) else {
                    continue;
                };
                let event = ProcessEvent::Output {
                    script_name: script_name.clone(),
                    pid,
                    stream,
                    line,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(script = %script_name, pid, stream = ?stream, error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

/// Single consumer of process events; the only place entries leave the registry after launch.
async fn run_event_loop(registry: Arc<TokioMutex<ProcessRegistry>>, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Output {
                script_name,
                pid,
                stream: OutputStream::Stdout,
                line,
            } => info!(script = %script_name, pid, "{}", line),
            ProcessEvent::Output {
                script_name,
                pid,
                stream: OutputStream::Stderr,
                line,
            } => warn!(script = %script_name, pid, "{}", line),
            ProcessEvent::Terminated {
                script_name,
                launch_id,
                pid,
                state,
            } => {
                let entry = registry.lock().await.remove_launch(&script_name, launch_id);
                let Some(mut entry) = entry else {
                    debug!(script = %script_name, pid, "Terminated process was no longer registered");
                    continue;
                };
                entry.state = state.clone();

                let notification = match state {
                    ProcessState::Exited { code, signal } => {
                        info!(script = %script_name, pid, exit_code = ?code, signal = ?signal, "Script exited");
                        Notification::Exited {
                            script_name: script_name.clone(),
                            code,
                            signal,
                        }
                    }
                    ProcessState::Failed(reason) => {
                        warn!(script = %script_name, pid, error = %reason, "Script failed");
                        Notification::Failed {
                            script_name: script_name.clone(),
                            reason,
                        }
                    }
                    ProcessState::Running => continue,
                };

                if let Some(notifier) = entry.notifier() {
                    if notifier.send(notification).is_err() {
                        debug!(script = %script_name, "Launching session is gone, dropping notification");
                    }
                }
            }
        }
    }
    debug!("Process event channel closed");
}
