use crate::bot::commands::{parse_command, BotCommand};
use crate::error::{LaunchError, StatusError, TerminateError};
use crate::process::{Notification, NotificationSender, ProcessManager, ScriptStatus};
use crate::utils::audit_logger::AuditLogger;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A conversation the bot replies into. Delayed notifications for scripts
/// started from this session are pushed through `notifications`.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub user_id: String,
    notifications: NotificationSender,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, notifications: NotificationSender) -> Self {
        Self {
            user_id: user_id.into(),
            notifications,
        }
    }

    /// Sender that delivers delayed notifications back into this session.
    pub fn notifier(&self) -> NotificationSender {
        self.notifications.clone()
    }
}

#[derive(Debug)]
pub struct CommandDispatcher {
    manager: Arc<ProcessManager>,
    allowed_users: Vec<String>,
    prefix: String,
    audit_logger: Option<Arc<AuditLogger>>,
}

impl CommandDispatcher {
    pub fn new(manager: Arc<ProcessManager>, allowed_users: Vec<String>, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            allowed_users,
            prefix: prefix.into(),
            audit_logger: None,
        }
    }

    pub fn with_audit_logger(mut self, audit_logger: Arc<AuditLogger>) -> Self {
        self.audit_logger = Some(audit_logger);
        self
    }

    fn is_authorized(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|u| u == user_id)
    }

    /// Handles one chat message and returns the immediate reply, if any.
    #[instrument(skip(self, session, message), fields(user = %session.user_id))]
    pub async fn handle_message(&self, session: &ChatSession, message: &str) -> Option<String> {
        let command = parse_command(message, &self.prefix)?;

        let reply = if self.is_authorized(&session.user_id) {
            info!(command = %command.name(), "Handling command");
            self.execute(session, &command).await
        } else {
            warn!(command = %command.name(), "Rejected command from unauthorized user");
            "You are not authorized to use this bot.".to_string()
        };

        if let Some(audit_logger) = &self.audit_logger {
            audit_logger.log_command(&session.user_id, command.name(), &reply).await;
        }
        Some(reply)
    }

    async fn execute(&self, session: &ChatSession, command: &BotCommand) -> String {
        match command {
            BotCommand::Start(name) => match self.manager.launch(name, Some(session.notifier())).await {
                Ok(outcome) => format!("Started script '{}' (PID {}).", outcome.name, outcome.pid),
                Err(LaunchError::UnknownScript(name)) => self.unknown_script_reply(&name),
                Err(e @ LaunchError::AlreadyRunning(_)) => format!("{}.", e),
                Err(e @ LaunchError::SpawnFailed { .. }) => e.to_string(),
            },
            BotCommand::Stop(name) => match self.manager.terminate(name).await {
                Ok(()) => format!("Termination requested for '{}'.", name),
                Err(TerminateError::UnknownScript(name)) => self.unknown_script_reply(&name),
                Err(e @ TerminateError::NotRunning(_)) => format!("{}.", e),
            },
            BotCommand::Status => match self.manager.status().await {
                Ok(statuses) => format_status_report(&statuses),
                Err(StatusError::NoScriptsConfigured) => "No scripts are configured.".to_string(),
            },
            BotCommand::Scripts => self.scripts_reply(),
            BotCommand::Help => self.help_reply(),
            BotCommand::MissingArgument(command) => {
                format!("Usage: {}{} <script name>", self.prefix, command)
            }
            BotCommand::Unknown(command) => format!(
                "Unknown command '{}'. Type {}help for the list of commands.",
                command, self.prefix
            ),
        }
    }

    fn unknown_script_reply(&self, name: &str) -> String {
        let suggestion = self
            .manager
            .scripts()
            .names()
            .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate);

        match suggestion {
            Some(candidate) => format!("Unknown script '{}'. Did you mean '{}'?", name, candidate),
            None => format!(
                "Unknown script '{}'. Type {}scripts to see what is available.",
                name, self.prefix
            ),
        }
    }

    fn scripts_reply(&self) -> String {
        let scripts = self.manager.scripts();
        if scripts.is_empty() {
            return "No scripts are configured.".to_string();
        }
        let mut reply = String::from("Available scripts:");
        for script in scripts.iter() {
            if script.description.is_empty() {
                reply.push_str(&format!("\n- {}", script.name));
            } else {
                reply.push_str(&format!("\n- {}: {}", script.name, script.description));
            }
        }
        reply
    }

    fn help_reply(&self) -> String {
        let p = &self.prefix;
        format!(
            "Commands:\n\
             {p}start <script>  start a configured script\n\
             {p}stop <script>   forcefully stop a running script\n\
             {p}status          show which scripts are running\n\
             {p}scripts         list configured scripts\n\
             {p}help            show this message"
        )
    }
}

pub fn format_status_report(statuses: &[ScriptStatus]) -> String {
    let mut report = String::from("Script status:");
    for status in statuses {
        match (status.is_running, status.started_at) {
            (true, Some(started_at)) => report.push_str(&format!(
                "\n- {}: running (PID {}, since {})",
                status.name,
                status.pid_display(),
                started_at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            (true, None) => report.push_str(&format!("\n- {}: running (PID {})", status.name, status.pid_display())),
            (false, _) => report.push_str(&format!("\n- {}: stopped (PID {})", status.name, status.pid_display())),
        }
    }
    report
}

pub fn format_notification(notification: &Notification) -> String {
    match notification {
        Notification::Exited {
            script_name,
            code: Some(code),
            ..
        } => format!("Script '{}' exited with code {}.", script_name, code),
        Notification::Exited {
            script_name,
            signal: Some(signal),
            ..
        } => format!("Script '{}' was terminated by signal {}.", script_name, signal),
        Notification::Exited { script_name, .. } => format!("Script '{}' exited.", script_name),
        Notification::Failed { script_name, reason } => format!("Script '{}' failed: {}", script_name, reason),
    }
}
