use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("An entry for '{0}' is already registered")]
    DuplicateEntry(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Script '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to start script '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminateError {
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Script '{0}' is not running")]
    NotRunning(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("No scripts are configured")]
    NoScriptsConfigured,
}

/// Raised by a terminator backend when the kill request could not be issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationIssue {
    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },
}

impl From<RegistryError> for LaunchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateEntry(name) => LaunchError::AlreadyRunning(name),
        }
    }
}
