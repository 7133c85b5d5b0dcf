// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

use super::types::WorkspaceConfig;

/// Workspace config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".vbranch.json", ".vbranch.yaml", ".vbranch/config.json"];

/// Local config file name (for per-checkout overrides).
pub const LOCAL_CONFIG_FILE: &str = ".vbranch.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".vbranch";

/// Global config file names to search for (in order).
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.json", "config.yaml"];

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Load global configuration from `~/.vbranch/`.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    match get_global_config_dir() {
        Some(dir) => load_first(&dir, GLOBAL_CONFIG_FILES),
        None => Ok(None),
    }
}

/// Load workspace configuration from the workspace root.
///
/// Searches for config files in the following order:
/// 1. .vbranch.json
/// 2. .vbranch.yaml
/// 3. .vbranch/config.json
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_first(workspace_root, CONFIG_FILES)
}

/// Load local configuration from .vbranch.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    load_first(workspace_root, &[LOCAL_CONFIG_FILE])
}

fn load_first(dir: &Path, names: &[&str]) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for name in names {
        let path = dir.join(name);
        if path.exists() {
            debug!(path = %path.display(), "Loading config file");
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if CONFIG_FILES.iter().any(|f| current.join(f).exists()) {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}
