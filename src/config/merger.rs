// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use crate::error::ConfigError;

use super::types::{EngineConfig, WorkspaceConfig};

/// Accepted values for the logging level.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Overrides read from `VBRANCH_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub ai_assisted: Option<bool>,
    pub ai_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ai_assisted = match lookup("VBRANCH_AI_ASSISTED") {
            Some(value) => Some(parse_bool("VBRANCH_AI_ASSISTED", &value)?),
            None => None,
        };

        let ai_timeout_ms = match lookup("VBRANCH_AI_TIMEOUT_MS") {
            Some(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue {
                    field: "VBRANCH_AI_TIMEOUT_MS".to_string(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            ai_assisted,
            ai_timeout_ms,
            log_level: lookup("VBRANCH_LOG_LEVEL"),
        })
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment overrides
/// 2. Local config (.vbranch.local.json)
/// 3. Workspace config (.vbranch.json)
/// 4. Global config (~/.vbranch/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    env: EnvOverrides,
) -> EngineConfig {
    let mut result = EngineConfig::default();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, config);
    }

    if let Some(ai_assisted) = env.ai_assisted {
        result.merge.ai_assisted = ai_assisted;
    }
    if let Some(timeout) = env.ai_timeout_ms {
        result.merge.ai_timeout_ms = timeout;
    }
    if let Some(level) = env.log_level {
        result.logging.level = level;
    }

    result
}

fn apply_workspace_config(result: &mut EngineConfig, config: WorkspaceConfig) {
    if let Some(merge) = config.merge {
        if let Some(v) = merge.ai_assisted {
            result.merge.ai_assisted = v;
        }
        if let Some(v) = merge.ai_timeout_ms {
            result.merge.ai_timeout_ms = v;
        }
        if let Some(v) = merge.diff_context_lines {
            result.merge.diff_context_lines = v;
        }
        if let Some(v) = merge.ours_label {
            result.merge.ours_label = v;
        }
        if let Some(v) = merge.theirs_label {
            result.merge.theirs_label = v;
        }
    }

    if let Some(provider) = config.provider {
        result.provider.provider = provider;
    }
    if config.model.is_some() {
        result.provider.model = config.model;
    }
    if config.base_url.is_some() {
        result.provider.base_url = config.base_url;
    }
    if let Some(max_tokens) = config.max_tokens {
        result.provider.max_tokens = max_tokens;
    }
    if let Some(timeout_ms) = config.timeout_ms {
        result.provider.timeout_ms = timeout_ms;
    }
    if let Some(level) = config.log_level {
        result.logging.level = level;
    }
}

/// Reject values the engine cannot run with.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.merge.ai_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            field: "merge.aiTimeoutMs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if config.provider.max_tokens == 0 {
        return Err(ConfigError::InvalidValue {
            field: "maxTokens".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logLevel".to_string(),
            message: format!("unknown level '{}'", config.logging.level),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::MergeConfigPartial;
    use std::collections::HashMap;

    #[test]
    fn test_merge_config_defaults() {
        let config = merge_config(None, None, None, EnvOverrides::default());
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = WorkspaceConfig {
            model: Some("global-model".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            model: Some("workspace-model".to_string()),
            merge: Some(MergeConfigPartial {
                ai_timeout_ms: Some(1_000),
                ours_label: Some("{branch}".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            merge: Some(MergeConfigPartial {
                ai_timeout_ms: Some(2_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env = EnvOverrides {
            ai_assisted: Some(false),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), Some(local), env);

        assert_eq!(config.provider.model.as_deref(), Some("workspace-model"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.merge.ai_timeout_ms, 2_000);
        assert_eq!(config.merge.ours_label, "{branch}");
        assert_eq!(config.merge.theirs_label, "{agent}");
        assert!(!config.merge.ai_assisted);
    }

    #[test]
    fn test_env_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("VBRANCH_AI_ASSISTED", "off"),
            ("VBRANCH_AI_TIMEOUT_MS", " 250 "),
            ("VBRANCH_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let env = EnvOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(env.ai_assisted, Some(false));
        assert_eq!(env.ai_timeout_ms, Some(250));
        assert_eq!(env.log_level.as_deref(), Some("trace"));
    }

    #[test]
    fn test_env_overrides_invalid() {
        let err = EnvOverrides::from_lookup(|k| {
            (k == "VBRANCH_AI_ASSISTED").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("VBRANCH_AI_ASSISTED"));

        let err = EnvOverrides::from_lookup(|k| {
            (k == "VBRANCH_AI_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&EngineConfig::default()).is_ok());

        let mut config = EngineConfig::default();
        config.merge.ai_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(validate_config(&config).is_err());
    }
}
