// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the virtual branch engine.
//!
//! This module provides strongly-typed errors for the branch store, the merge
//! engine, LLM adapters and configuration loading, using `thiserror` for
//! ergonomic error definitions and `anyhow` for error propagation.

use thiserror::Error;

/// A single file operation that failed while merging a branch to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpFailure {
    /// Path the operation targeted.
    pub path: String,
    /// Human-readable cause.
    pub message: String,
}

impl std::fmt::Display for FileOpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors returned by the virtual branch store.
#[derive(Error, Debug)]
pub enum BranchError {
    #[error("Branch not found: {0}")]
    NotFound(String),

    #[error("Branch {branch_id} is {status}, expected active")]
    InvalidStatus { branch_id: String, status: String },

    #[error("Merge of branch {branch_id} failed: {}", join_failures(.failures))]
    MergeFailed {
        branch_id: String,
        failures: Vec<FileOpFailure>,
    },
}

fn join_failures(failures: &[FileOpFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BranchError {
    /// Stable error code for callers that match on strings.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "BRANCH_NOT_FOUND",
            Self::InvalidStatus { .. } => "INVALID_BRANCH_STATUS",
            Self::MergeFailed { .. } => "MERGE_FAILED",
        }
    }

    /// Whether the caller can recover by re-querying state and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MergeFailed { .. })
    }
}

/// Errors returned by the merge engine.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("Conflict {conflict_id} is stale: {reason}")]
    Stale { conflict_id: String, reason: String },

    #[error("Branch error: {0}")]
    Branch(#[from] BranchError),
}

impl MergeError {
    /// Stable error code for callers that match on strings.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConflictNotFound(_) => "CONFLICT_NOT_FOUND",
            Self::Stale { .. } => "CONFLICT_STALE",
            Self::Branch(e) => e.code(),
        }
    }
}

/// Errors that can occur while talking to an LLM adapter.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::NetworkError(_) | Self::Timeout(_)
        )
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_error_codes() {
        assert_eq!(BranchError::NotFound("b".into()).code(), "BRANCH_NOT_FOUND");
        assert_eq!(
            BranchError::InvalidStatus {
                branch_id: "b".into(),
                status: "merged".into()
            }
            .code(),
            "INVALID_BRANCH_STATUS"
        );
        assert_eq!(
            BranchError::MergeFailed {
                branch_id: "b".into(),
                failures: vec![]
            }
            .code(),
            "MERGE_FAILED"
        );
    }

    #[test]
    fn test_merge_failed_aggregates_messages() {
        let err = BranchError::MergeFailed {
            branch_id: "b1".into(),
            failures: vec![
                FileOpFailure {
                    path: "/a.txt".into(),
                    message: "permission denied".into(),
                },
                FileOpFailure {
                    path: "/b.txt".into(),
                    message: "not a directory".into(),
                },
            ],
        };
        let display = err.to_string();
        assert!(display.contains("b1"));
        assert!(display.contains("/a.txt: permission denied"));
        assert!(display.contains("/b.txt: not a directory"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_merge_error_delegates_branch_code() {
        let err: MergeError = BranchError::NotFound("x".into()).into();
        assert_eq!(err.code(), "BRANCH_NOT_FOUND");
        assert_eq!(
            MergeError::ConflictNotFound("c".into()).code(),
            "CONFLICT_NOT_FOUND"
        );
    }

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::RateLimited("wait 1s".to_string()).is_retryable());
        assert!(ProviderError::Timeout(30000).is_retryable());
        assert!(!ProviderError::AuthError("invalid key".to_string()).is_retryable());
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }
}
