//! Provider and orchestration error types
//!
//! `ProviderError` is produced at the provider-client boundary and tags every
//! failure with its origin and a transport-level kind, so fallback policy can
//! pattern-match instead of inspecting message text. `QueryError` is what the
//! orchestrator hands back to its caller.

use reqwest::StatusCode;
use thiserror::Error;
use trialdoc_common::{errors::AppError, ProviderKind};

/// Failure of a single provider call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider} is not configured: {message}")]
    Configuration { provider: ProviderKind, message: String },

    #[error("{provider} request timed out after {timeout_ms}ms")]
    Timeout { provider: ProviderKind, timeout_ms: u64 },

    #[error("{provider} request was cancelled")]
    Cancelled { provider: ProviderKind },

    #[error("{provider} network error: {message}")]
    Network { provider: ProviderKind, message: String },

    #[error("{provider} upstream error {status}: {message}")]
    Http {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{provider} rejected the request with {status}: {message}")]
    Client {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    Decode { provider: ProviderKind, message: String },

    #[error("{provider} error: {message}")]
    Unknown { provider: ProviderKind, message: String },
}

impl ProviderError {
    /// Origin provider of this failure
    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Configuration { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Cancelled { provider }
            | ProviderError::Network { provider, .. }
            | ProviderError::Http { provider, .. }
            | ProviderError::Client { provider, .. }
            | ProviderError::Decode { provider, .. }
            | ProviderError::Unknown { provider, .. } => *provider,
        }
    }

    pub fn configuration(provider: ProviderKind, message: impl Into<String>) -> Self {
        ProviderError::Configuration {
            provider,
            message: message.into(),
        }
    }

    pub fn decode(provider: ProviderKind, message: impl Into<String>) -> Self {
        ProviderError::Decode {
            provider,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status: 4xx is a client error, 5xx an upstream one
    pub fn from_status(provider: ProviderKind, status: StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("no response body").to_string()
        } else {
            truncate(body.trim(), 500)
        };

        if status.is_client_error() {
            ProviderError::Client {
                provider,
                status: status.as_u16(),
                message,
            }
        } else if status.is_server_error() {
            ProviderError::Http {
                provider,
                status: status.as_u16(),
                message,
            }
        } else {
            ProviderError::Unknown {
                provider,
                message: format!("unexpected status {}: {}", status.as_u16(), message),
            }
        }
    }

    /// Classify a transport-level failure from the HTTP client
    pub fn from_reqwest(provider: ProviderKind, err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider,
                timeout_ms,
            }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ProviderError::Network {
                provider,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ProviderError::Decode {
                provider,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            ProviderError::from_status(provider, status, &err.to_string())
        } else {
            ProviderError::Unknown {
                provider,
                message: err.to_string(),
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max_chars).collect();
        truncated.push('…');
        truncated
    }
}

/// Failure of an orchestrated query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The primary backend failed and no automatic fallback was attempted
    #[error("Primary backend failed: {source}")]
    Primary {
        source: ProviderError,
        can_retry: bool,
        suggest_fallback: bool,
    },

    /// The fallback provider failed on a direct or manual call
    #[error("Fallback provider failed: {source}")]
    Fallback { source: ProviderError },

    /// The LLM citation service failed on a direct query
    #[error("LLM citation service failed: {source}")]
    Llm { source: ProviderError },

    /// Terminal for this call; the caller must not retry automatically
    #[error("Both providers failed. Primary: {primary}. Fallback: {fallback}")]
    BothFailed {
        primary: ProviderError,
        fallback: ProviderError,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Query was cancelled")]
    Cancelled,
}

impl QueryError {
    /// Provider the failure originated from, when there is exactly one
    pub fn origin(&self) -> Option<ProviderKind> {
        match self {
            QueryError::Primary { source, .. }
            | QueryError::Fallback { source }
            | QueryError::Llm { source } => Some(source.provider()),
            _ => None,
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::Primary {
                source: ProviderError::Client { provider, .. },
                ..
            }
            | QueryError::Fallback {
                source: ProviderError::Client { provider, .. },
            }
            | QueryError::Llm {
                source: ProviderError::Client { provider, .. },
            } => AppError::UpstreamRejected { provider, message },
            QueryError::Primary {
                source: ProviderError::Configuration { .. },
                ..
            }
            | QueryError::Fallback {
                source: ProviderError::Configuration { .. },
            }
            | QueryError::Llm {
                source: ProviderError::Configuration { .. },
            }
            | QueryError::Configuration { .. } => AppError::Configuration { message },
            QueryError::Primary {
                source,
                can_retry,
                suggest_fallback,
            } => AppError::ProviderUnavailable {
                provider: source.provider(),
                message,
                can_retry,
                suggest_fallback,
            },
            QueryError::Fallback { source } | QueryError::Llm { source } => AppError::ProviderUnavailable {
                provider: source.provider(),
                message,
                can_retry: false,
                suggest_fallback: false,
            },
            QueryError::BothFailed { .. } => AppError::BothProvidersFailed { message },
            QueryError::Cancelled => AppError::Cancelled,
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::Configuration { .. } => AppError::Configuration { message },
            ProviderError::Client { provider, .. } => AppError::UpstreamRejected { provider, message },
            ProviderError::Cancelled { .. } => AppError::Cancelled,
            other => AppError::ProviderUnavailable {
                provider: other.provider(),
                message,
                can_retry: true,
                suggest_fallback: false,
            },
        }
    }
}
