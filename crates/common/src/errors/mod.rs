//! Error types for TrialDoc services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses carrying fallback hints for the UI
//! - Error codes for client handling

use crate::models::ProviderKind;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    SourceNotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    ProviderUnavailable,
    UpstreamRejected,
    BothProvidersFailed,
    RequestCancelled,

    // Internal errors (9xxx)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Resources (4xxx)
            ErrorCode::SourceNotFound => 4002,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // External (8xxx)
            ErrorCode::ProviderUnavailable => 8002,
            ErrorCode::UpstreamRejected => 8003,
            ErrorCode::BothProvidersFailed => 8004,
            ErrorCode::RequestCancelled => 8005,

            // Internal (9xxx)
            ErrorCode::ConfigurationError => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Resource errors
    #[error("No cached source for document: {document_id}")]
    SourceNotFound { document_id: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Provider errors
    #[error("{message}")]
    ProviderUnavailable {
        provider: ProviderKind,
        message: String,
        can_retry: bool,
        suggest_fallback: bool,
    },

    #[error("{message}")]
    UpstreamRejected {
        provider: ProviderKind,
        message: String,
    },

    #[error("{message}")]
    BothProvidersFailed { message: String },

    #[error("Request cancelled")]
    Cancelled,

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            AppError::UpstreamRejected { .. } => ErrorCode::UpstreamRejected,
            AppError::BothProvidersFailed { .. } => ErrorCode::BothProvidersFailed,
            AppError::Cancelled => ErrorCode::RequestCancelled,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::SourceNotFound { .. } => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::UpstreamRejected { .. } | AppError::BothProvidersFailed { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable hints the UI uses to choose between a fallback
    /// offer and a terminal failure message
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ProviderUnavailable {
                provider,
                can_retry,
                suggest_fallback,
                ..
            } => Some(serde_json::json!({
                "provider": provider,
                "canRetry": can_retry,
                "suggestFallback": suggest_fallback,
            })),
            AppError::UpstreamRejected { provider, .. } => Some(serde_json::json!({
                "provider": provider,
                "canRetry": false,
                "suggestFallback": false,
            })),
            AppError::BothProvidersFailed { .. } => Some(serde_json::json!({
                "canRetry": false,
                "suggestFallback": false,
            })),
            _ => None,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let details = self.details();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SourceNotFound {
            document_id: "doc1".into(),
        };
        assert_eq!(err.code(), ErrorCode::SourceNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Message is empty".into(),
            field: Some("message".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_provider_unavailable_details() {
        let err = AppError::ProviderUnavailable {
            provider: ProviderKind::Primary,
            message: "primary upstream error 503".into(),
            can_retry: true,
            suggest_fallback: true,
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let details = err.details().unwrap();
        assert_eq!(details["provider"], "primary");
        assert_eq!(details["canRetry"], true);
        assert_eq!(details["suggestFallback"], true);
    }

    #[test]
    fn test_configuration_and_cancellation_status() {
        let err = AppError::Configuration {
            message: "third-party API key is not set".into(),
        };
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.details().is_none());

        assert_eq!(AppError::Cancelled.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(AppError::RateLimited { limit: 20 }.code().as_code(), 6001);
    }

    #[test]
    fn test_both_failed_is_terminal() {
        let err = AppError::BothProvidersFailed {
            message: "Primary: down. Fallback: down".into(),
        };
        assert_eq!(err.code().as_code(), 8004);
        assert_eq!(err.details().unwrap()["suggestFallback"], false);
        assert!(err.is_server_error());
    }
}
