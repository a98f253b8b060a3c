//! File and path helpers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::core::constants::APP_DOT_FOLDER;

/// Expand `~`, `~/path` and relative paths to an absolute path
///
/// Relative paths are joined to the current directory without being
/// canonicalized; absolute paths pass through unchanged. An empty string
/// yields the current directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = match (path, dirs::home_dir()) {
        ("~", Some(home)) => home,
        (_, Some(home)) if path.starts_with("~/") => home.join(&path[2..]),
        _ => PathBuf::from(path),
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

/// `~/.tracehub/<file_name>`, `None` without a home directory
pub fn profile_path(file_name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DOT_FOLDER).join(file_name))
}

/// Read and deserialize a JSON file; `what` names the file in errors
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}: {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}: {}", what, path.display()))
}
