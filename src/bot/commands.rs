/// A chat command addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start(String),
    Stop(String),
    Status,
    Scripts,
    Help,
    /// A known command that needs a script name but got none.
    MissingArgument(&'static str),
    Unknown(String),
}

impl BotCommand {
    /// Canonical command name, used for audit entries.
    pub fn name(&self) -> &str {
        match self {
            BotCommand::Start(_) => "start",
            BotCommand::Stop(_) => "stop",
            BotCommand::Status => "status",
            BotCommand::Scripts => "scripts",
            BotCommand::Help => "help",
            BotCommand::MissingArgument(command) => *command,
            BotCommand::Unknown(command) => command.as_str(),
        }
    }
}

/// Parses a chat message. Returns `None` when the message is not addressed to the bot.
pub fn parse_command(message: &str, prefix: &str) -> Option<BotCommand> {
    let body = message.trim().strip_prefix(prefix)?;
    let mut parts = body.split_whitespace();
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::to_string);

    let parsed = match command.as_str() {
        "start" | "run" => argument.map_or(BotCommand::MissingArgument("start"), BotCommand::Start),
        "stop" | "kill" => argument.map_or(BotCommand::MissingArgument("stop"), BotCommand::Stop),
        "status" => BotCommand::Status,
        "scripts" | "list" => BotCommand::Scripts,
        "help" => BotCommand::Help,
        _ => BotCommand::Unknown(command),
    };
    Some(parsed)
}
