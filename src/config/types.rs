// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`WorkspaceConfig`] is the on-disk form where every field is optional;
//! [`EngineConfig`] is the fully resolved form handed to the engine.

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_DIFF_CONTEXT;

/// Default budget for one AI-assisted merge attempt.
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 60_000;

/// Default label template for conflict delimiters.
pub const DEFAULT_LABEL: &str = "{agent}";

/// On-disk configuration, as found in `.vbranch.json` or `.vbranch.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Merge cascade settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeConfigPartial>,

    /// LLM provider (currently only `anthropic`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model name to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Custom base URL for the provider API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// HTTP timeout for provider requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Default tracing level (`trace`, `debug`, `info`, `warn`, `error`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Partial merge settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_assisted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_context_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ours_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theirs_label: Option<String>,
}

/// Resolved merge cascade settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    /// Try the AI step when an adapter is configured.
    pub ai_assisted: bool,
    /// Abandon the AI step after this many milliseconds.
    pub ai_timeout_ms: u64,
    /// Context lines in diffs shown to the AI step.
    pub diff_context_lines: usize,
    /// Label after `<<<<<<<`. `{agent}`, `{task}` and `{branch}` are
    /// replaced with the first branch's values.
    pub ours_label: String,
    /// Label after `>>>>>>>`, with the same placeholders for the second branch.
    pub theirs_label: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ai_assisted: true,
            ai_timeout_ms: DEFAULT_AI_TIMEOUT_MS,
            diff_context_lines: DEFAULT_DIFF_CONTEXT,
            ours_label: DEFAULT_LABEL.to_string(),
            theirs_label: DEFAULT_LABEL.to_string(),
        }
    }
}

/// Resolved LLM provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            base_url: None,
            max_tokens: 8192,
            timeout_ms: 120_000,
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub merge: MergeConfig,
    pub provider: ProviderSettings,
    pub logging: LoggingSettings,
}
