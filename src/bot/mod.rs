pub mod commands;
pub mod console;
pub mod dispatcher;

pub use commands::{parse_command, BotCommand};
pub use dispatcher::{format_notification, format_status_report, ChatSession, CommandDispatcher};
