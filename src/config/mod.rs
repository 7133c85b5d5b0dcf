// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.vbranch/config.json or ~/.vbranch/config.yaml
//! - Workspace config: .vbranch.json, .vbranch.yaml, or .vbranch/config.json
//! - Local config: .vbranch.local.json (gitignored, for personal overrides)
//! - Environment: VBRANCH_AI_ASSISTED, VBRANCH_AI_TIMEOUT_MS, VBRANCH_LOG_LEVEL
//!
//! Configuration is merged with precedence (env > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_global_config_dir, load_config_file, load_global_config,
    load_local_config, load_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILES,
    LOCAL_CONFIG_FILE,
};

pub use merger::{merge_config, validate_config, EnvOverrides, LOG_LEVELS};

pub use types::{
    EngineConfig, LoggingSettings, MergeConfig, MergeConfigPartial, ProviderSettings,
    WorkspaceConfig, DEFAULT_AI_TIMEOUT_MS, DEFAULT_LABEL,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a workspace.
pub fn load_config(workspace_root: &Path) -> Result<EngineConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;
    let env = EnvOverrides::from_env()?;

    let config = merge_config(global, workspace, local, env);
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path()).unwrap();
        // Provider could come from a global config; it is never empty.
        assert!(!config.provider.provider.is_empty());
    }

    #[test]
    fn test_load_config_local_overrides_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".vbranch.json"),
            r#"{"model": "workspace", "merge": {"diffContextLines": 7}}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join(".vbranch.local.json"), r#"{"model": "local"}"#).unwrap();

        let config = load_config(temp.path()).unwrap();
        assert_eq!(config.provider.model.as_deref(), Some("local"));
        assert_eq!(config.merge.diff_context_lines, 7);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".vbranch.json"),
            r#"{"merge": {"aiTimeoutMs": 0}}"#,
        )
        .unwrap();

        let result = load_config(temp.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
