use crate::process::registry::ProcessState;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Delayed message for the session that launched a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Exited {
        script_name: String,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Failed {
        script_name: String,
        reason: String,
    },
}

impl Notification {
    pub fn script_name(&self) -> &str {
        match self {
            Notification::Exited { script_name, .. } | Notification::Failed { script_name, .. } => script_name,
        }
    }
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Event raised by a process observer and consumed by the manager's event loop.
#[derive(Debug)]
pub(crate) enum ProcessEvent {
    Output {
        script_name: String,
        pid: u32,
        stream: OutputStream,
        line: String,
    },
    Terminated {
        script_name: String,
        launch_id: Uuid,
        pid: u32,
        state: ProcessState,
    },
}
