use anyhow::Result;
use script_runner_bot::bot::{console::run_console, CommandDispatcher};
use script_runner_bot::config::Config;
use script_runner_bot::process::ProcessManager;
use script_runner_bot::utils::audit_logger::AuditLogger;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("script_runner_bot={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    setup_logging(&config.log_level)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting script-runner-bot");
    tracing::debug!("Loaded configuration: {:?}", config);
    tracing::info!(
        scripts = config.scripts.len(),
        allowed_users = config.allowed_users.len(),
        path = %config.scripts_file.display(),
        "Script table loaded"
    );
    if !config.is_user_allowed(&config.console_user) {
        tracing::warn!(user = %config.console_user, "Console user is not in the allowed user list");
    }

    let manager = Arc::new(ProcessManager::new(config.scripts.clone()));
    let audit_logger = Arc::new(AuditLogger::new(
        config.audit_log_file.clone(),
        config.audit_log_max_size_bytes,
    ));
    let dispatcher = Arc::new(
        CommandDispatcher::new(manager.clone(), config.allowed_users.clone(), config.command_prefix.clone())
            .with_audit_logger(audit_logger),
    );

    run_console(dispatcher, manager, config.console_user.clone()).await?;

    tracing::info!("Bot shutdown.");
    Ok(())
}
