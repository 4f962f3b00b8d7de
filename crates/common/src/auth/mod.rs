//! Bearer credential extraction
//!
//! The credential is issued by an external auth provider and treated as an
//! opaque string: it is never validated here, only forwarded to providers
//! as `Authorization: Bearer <token>`.

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Caller identity available to handlers
#[derive(Clone)]
pub struct BearerCredential {
    /// Opaque bearer token
    pub token: String,

    /// Request ID for tracing
    pub request_id: String,
}

impl std::fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerCredential")
            .field("token", &"<redacted>")
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Extract the token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for BearerCredential
impl<S> FromRequestParts<S> for BearerCredential
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        // Extract request ID
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must be a Bearer token".to_string(),
            })?
            .to_string();

        Ok(BearerCredential { token, request_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer tok_123"), Some("tok_123"));
        assert_eq!(extract_bearer("Bearer   "), None);
        assert_eq!(extract_bearer("tok_123"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = BearerCredential {
            token: "secret".to_string(),
            request_id: "req-1".to_string(),
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("req-1"));
    }

    #[tokio::test]
    async fn test_extractor_reads_headers() {
        let request = Request::builder()
            .header("authorization", "Bearer tok")
            .header("x-request-id", "req-42")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let credential = BearerCredential::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(credential.token, "tok");
        assert_eq!(credential.request_id, "req-42");
    }

    #[tokio::test]
    async fn test_extractor_rejects_missing_header() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let result = BearerCredential::from_request_parts(&mut parts, &()).await;
        tokio_test::assert_err!(result);
    }
}
