use crate::error::AppError;
use crate::utils::path_utils::{expand_tilde_path_buf, resolve_script_path};
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A runnable script as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDefinition {
    pub name: String,
    pub executable_path: PathBuf,
    pub description: String,
}

/// Ordered set of script definitions with unique names.
#[derive(Debug, Clone, Default)]
pub struct ScriptTable {
    scripts: Vec<ScriptDefinition>,
}

impl ScriptTable {
    pub fn new(scripts: Vec<ScriptDefinition>) -> Result<Self, AppError> {
        let name_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$")
            .map_err(|e| AppError::ConfigError(format!("Invalid script name pattern: {}", e)))?;

        let mut seen = HashSet::new();
        for script in &scripts {
            if !name_pattern.is_match(&script.name) {
                return Err(AppError::ConfigError(format!(
                    "Invalid script name '{}': use letters, digits, '_', '-' or '.'",
                    script.name
                )));
            }
            if !seen.insert(script.name.as_str()) {
                return Err(AppError::ConfigError(format!("Duplicate script name '{}'", script.name)));
            }
        }
        Ok(Self { scripts })
    }

    /// Builds the table from raw file entries, resolving paths against `base_dir`.
    fn from_entries(entries: Vec<ScriptEntry>, base_dir: &Path) -> Result<Self, AppError> {
        let scripts = entries
            .into_iter()
            .map(|entry| {
                Ok(ScriptDefinition {
                    executable_path: resolve_script_path(&entry.filepath, base_dir)?,
                    name: entry.name,
                    description: entry.description,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Self::new(scripts)
    }

    pub fn get(&self, name: &str) -> Option<&ScriptDefinition> {
        self.scripts.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptDefinition> + Clone {
        self.scripts.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + Clone {
        self.scripts.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ScriptsFile {
    #[serde(default)]
    allowed_users: Vec<String>,
    #[serde(default)]
    scripts: Vec<ScriptEntry>,
}

#[derive(Debug, Deserialize)]
struct ScriptEntry {
    name: String,
    filepath: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub scripts_file: PathBuf,
    pub scripts: ScriptTable,
    pub allowed_users: Vec<String>,
    pub command_prefix: String,
    pub console_user: String,
    pub log_level: String,
    pub audit_log_file: PathBuf,
    pub audit_log_max_size_bytes: u64,
}

/// Parses the scripts file contents. Relative script paths resolve against `base_dir`.
fn parse_scripts_file(contents: &str, base_dir: &Path) -> Result<(Vec<String>, ScriptTable), AppError> {
    let file: ScriptsFile = serde_json::from_str(contents)?;
    let table = ScriptTable::from_entries(file.scripts, base_dir)?;
    Ok((file.allowed_users, table))
}

/// Merges the file's user list with a comma-separated override, dropping blanks and duplicates.
fn merge_allowed_users(from_file: Vec<String>, from_env: &str) -> Vec<String> {
    let mut users: Vec<String> = Vec::new();
    let candidates = from_file
        .into_iter()
        .chain(from_env.split(',').map(str::to_string));
    for user in candidates {
        let user = user.trim().to_string();
        if !user.is_empty() && !users.contains(&user) {
            users.push(user);
        }
    }
    users
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let scripts_file_str = std::env::var("SCRIPTS_CONFIG").unwrap_or_else(|_| "scripts.json".to_string());
        let scripts_file = expand_tilde_path_buf(&scripts_file_str)?;
        let scripts_file = dunce::canonicalize(&scripts_file)
            .context(format!("Scripts configuration not found: {}", scripts_file_str))?;
        let base_dir = scripts_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let contents = std::fs::read_to_string(&scripts_file)
            .context(format!("Failed to read scripts configuration: {}", scripts_file.display()))?;
        let (file_users, scripts) = parse_scripts_file(&contents, &base_dir)
            .context(format!("Invalid scripts configuration: {}", scripts_file.display()))?;

        let allowed_users = merge_allowed_users(file_users, &std::env::var("ALLOWED_USERS").unwrap_or_default());
        if allowed_users.is_empty() {
            warn!("No allowed users configured. Every command will be rejected.");
        }
        if scripts.is_empty() {
            warn!(path = %scripts_file.display(), "No scripts configured.");
        }

        let command_prefix = std::env::var("COMMAND_PREFIX")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "!".to_string());

        let console_user = std::env::var("CONSOLE_USER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "console".to_string());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let audit_log_file = match std::env::var("AUDIT_LOG_FILE") {
            Ok(path) if !path.is_empty() => expand_tilde_path_buf(&path)?,
            _ => base_dir.join(".bot-logs").join("commands.log"),
        };
        let audit_log_max_size_bytes = std::env::var("AUDIT_LOG_MAX_SIZE_MB")
            .unwrap_or_else(|_| "10".to_string()) // Default 10 MB
            .parse::<u64>()
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(10 * 1024 * 1024);

        Ok(Config {
            scripts_file,
            scripts,
            allowed_users,
            command_prefix,
            console_user,
            log_level,
            audit_log_file,
            audit_log_max_size_bytes,
        })
    }

    pub fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|u| u == user_id)
    }
}
