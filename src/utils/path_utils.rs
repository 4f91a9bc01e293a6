use crate::error::AppError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Expands tilde (~) and `$VAR` references in a path string.
pub fn expand_tilde_path_buf(path_str: &str) -> Result<PathBuf, AppError> {
    shellexpand::full(path_str)
        .map(|cow_str| PathBuf::from(cow_str.as_ref()))
        .map_err(|e| AppError::InvalidPath(format!("Failed to expand path '{}': {}", path_str, e)))
}

/// Resolves a configured script path to an absolute one.
///
/// Relative paths are joined onto `base_dir` (the directory holding the
/// scripts file). `..` components are folded lexically. Existing paths are
/// canonicalized; missing ones are returned as-is so they still fail at spawn.
pub fn resolve_script_path(path_str: &str, base_dir: &Path) -> Result<PathBuf, AppError> {
    if path_str.trim().is_empty() {
        return Err(AppError::InvalidPath("Script path is empty".to_string()));
    }
    let expanded_path = expand_tilde_path_buf(path_str)?;

    let absolute_path = if expanded_path.is_absolute() {
        expanded_path
    } else {
        base_dir.join(expanded_path)
    };

    let mut components: Vec<Component> = Vec::new();
    for component in absolute_path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
                // `..` above the root stays at the root
            }
            _ => components.push(component),
        }
    }
    let normalized: PathBuf = components.iter().collect();

    match dunce::canonicalize(&normalized) {
        Ok(canonical_path) => Ok(canonical_path),
        Err(e) => {
            debug!(path = %normalized.display(), error = %e, "Script path does not resolve yet; keeping it verbatim");
            Ok(normalized)
        }
    }
}

/// Directory a script is started in: the parent of its executable.
pub fn working_dir_for(executable_path: &Path) -> PathBuf {
    executable_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
