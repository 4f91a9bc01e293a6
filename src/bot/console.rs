//! Line-based chat session on stdin/stdout, used when no chat network is attached.

use crate::bot::dispatcher::{format_notification, ChatSession, CommandDispatcher};
use crate::process::{NotificationReceiver, ProcessManager};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// How long shutdown waits for terminated scripts to be reaped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// How long shutdown waits for pending notifications to be printed.
const NOTIFICATION_FLUSH: Duration = Duration::from_secs(2);

/// Prints delayed notifications until every sender for the session is gone.
fn spawn_printer<F>(mut notifications_rx: NotificationReceiver, mut emit: F) -> JoinHandle<()>
where
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(notification) = notifications_rx.recv().await {
            debug!(script = %notification.script_name(), "Delivering notification");
            emit(format_notification(&notification));
        }
    })
}

pub async fn run_console(dispatcher: Arc<CommandDispatcher>, manager: Arc<ProcessManager>, user_id: String) -> Result<()> {
    let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
    let session = ChatSession::new(user_id, notifications_tx);
    let printer = spawn_printer(notifications_rx, |line| println!("{}", line));

    info!(user = %session.user_id, "Console session ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(reply) = dispatcher.handle_message(&session, &line).await {
                        println!("{}", reply);
                    }
                }
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down console session");
                break;
            }
        }
    }

    close_session(&manager, session, printer).await;
    Ok(())
}

/// Stops running scripts, then lets the printer flush their exit notifications.
async fn close_session(manager: &ProcessManager, session: ChatSession, printer: JoinHandle<()>) {
    shutdown_scripts(manager).await;
    // Registry entries hold the remaining senders; once they are gone the printer ends.
    drop(session);
    if timeout(NOTIFICATION_FLUSH, printer).await.is_err() {
        warn!("Notification printer did not finish before shutdown");
    }
}

/// Kills whatever is still running and waits briefly for the exits to be observed.
async fn shutdown_scripts(manager: &ProcessManager) {
    let requested = manager.terminate_all().await;
    if requested.is_empty() {
        return;
    }
    info!(scripts = ?requested, "Terminating running scripts before exit");

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while manager.running_count().await > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(remaining = manager.running_count().await, "Scripts still registered at shutdown");
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
}
