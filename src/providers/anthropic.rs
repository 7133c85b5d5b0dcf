// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic Claude adapter.
//!
//! Sends single-turn, non-streaming requests to the
//! [Messages API](https://docs.anthropic.com/en/api/messages).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use super::{CompletionRequest, CompletionResponse, LlmAdapter};
use crate::error::ProviderError;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default max tokens if not specified.
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// [`LlmAdapter`] for Anthropic's Claude models.
pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicAdapter {
    /// Create an adapter with the default timeout.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Replace the HTTP client with one using a different timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, ProviderError> {
        self.client = build_client(Duration::from_millis(timeout_ms))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: CompletionRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: request.system,
            messages: vec![ApiMessage {
                role: "user",
                content: request.prompt,
            }],
        }
    }

    /// Map an error response to a [`ProviderError`].
    fn handle_error_response(&self, status_code: u16, body: &str) -> ProviderError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            match error.error.error_type.as_str() {
                "authentication_error" => ProviderError::AuthError(error.error.message),
                "rate_limit_error" => ProviderError::RateLimited(error.error.message),
                "invalid_request_error" => {
                    if error.error.message.contains("model") {
                        ProviderError::ModelNotFound(error.error.message)
                    } else {
                        ProviderError::api(error.error.message, status_code)
                    }
                }
                "overloaded_error" => ProviderError::RateLimited("API overloaded".to_string()),
                _ => ProviderError::api(error.error.message, status_code),
            }
        } else {
            ProviderError::api(body.to_string(), status_code)
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to build HTTP client: {}", e)))
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request(request);
        let start = Instant::now();

        debug!(model = %self.model, max_tokens = body.max_tokens, "Sending completion request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(start.elapsed().as_millis() as u64)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_operation("anthropic.complete", start.elapsed());
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("anthropic.complete", start.elapsed());

        Ok(api_response.into())
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl From<ApiResponse> for CompletionResponse {
    fn from(response: ApiResponse) -> Self {
        let text = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiContentBlock::Text { text } => Some(text),
                ApiContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let (input_tokens, output_tokens) = response
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Self {
            text,
            input_tokens,
            output_tokens,
        }
    }
}
