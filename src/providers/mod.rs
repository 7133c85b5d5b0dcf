// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! LLM adapters used by the AI-assisted merge step.
//!
//! The merge engine only needs one capability from a language model: turn a
//! prompt into text. [`LlmAdapter`] captures exactly that, so any backend can
//! be plugged in. [`AnthropicAdapter`] talks to the Anthropic Messages API.
//!
//! # Quick Start
//!
//! ```bash
//! export ANTHROPIC_API_KEY=your-key
//! ```
//!
//! ```rust,ignore
//! use vbranch::providers::create_adapter_from_env;
//!
//! let engine = match create_adapter_from_env() {
//!     Some(adapter) => engine.with_adapter(adapter),
//!     None => engine,
//! };
//! ```

pub mod anthropic;

pub use anthropic::AnthropicAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderSettings;
use crate::error::ProviderError;

/// Default model for the Anthropic adapter.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Upper bound on generated tokens; the adapter default applies if unset.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text returned by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A language model that can complete a prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Short name used for attribution (e.g. `anthropic`).
    fn name(&self) -> &str;
}

/// Shared adapter handle.
pub type SharedAdapter = Arc<dyn LlmAdapter>;

/// Build an adapter from explicit settings.
///
/// The API key always comes from `ANTHROPIC_API_KEY`.
///
/// # Errors
///
/// Returns [`ProviderError::NotConfigured`] for an unknown provider or a
/// missing API key.
pub fn create_adapter(settings: &ProviderSettings) -> Result<SharedAdapter, ProviderError> {
    match settings.provider.to_lowercase().as_str() {
        "anthropic" | "claude" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                ProviderError::NotConfigured("ANTHROPIC_API_KEY not set".to_string())
            })?;
            let adapter = AnthropicAdapter::new(
                api_key,
                settings
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
                settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            )?
            .with_max_tokens(settings.max_tokens)
            .with_timeout_ms(settings.timeout_ms)?;
            Ok(Arc::new(adapter))
        }
        other => Err(ProviderError::NotConfigured(format!("Unknown provider: {}", other))),
    }
}

/// Create an adapter from environment variables.
///
/// | Variable | Description |
/// |----------|-------------|
/// | `ANTHROPIC_API_KEY` | Anthropic API key (required) |
/// | `VBRANCH_MODEL` | Override default model |
/// | `ANTHROPIC_BASE_URL` | Custom Anthropic base URL |
///
/// Returns `None` when no key is set, so the engine runs without AI.
pub fn create_adapter_from_env() -> Option<SharedAdapter> {
    let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
        debug!("ANTHROPIC_API_KEY not set; AI-assisted merging disabled");
        return None;
    };

    let model = std::env::var("VBRANCH_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string());
    let base_url =
        std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string());

    match AnthropicAdapter::new(api_key, model, base_url) {
        Ok(adapter) => Some(Arc::new(adapter)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Anthropic adapter");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("merge this")
            .with_system("you merge code")
            .with_max_tokens(100);
        assert_eq!(request.prompt, "merge this");
        assert_eq!(request.system.as_deref(), Some("you merge code"));
        assert_eq!(request.max_tokens, Some(100));
    }

    #[test]
    fn test_unknown_provider() {
        let settings = ProviderSettings {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        match create_adapter(&settings) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("carrier-pigeon")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_mock_adapter() {
        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .returning(|req| Ok(CompletionResponse::text(req.prompt.to_uppercase())));

        let adapter: SharedAdapter = Arc::new(mock);
        let response = adapter.complete(CompletionRequest::new("abc")).await.unwrap();
        assert_eq!(response.text, "ABC");
        assert_eq!(adapter.name(), "mock");
    }
}
