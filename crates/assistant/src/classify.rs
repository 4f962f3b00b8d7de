//! Failure classification
//!
//! Decides whether a provider failure indicates provider unavailability
//! (worth retrying on an alternate provider) or a request bug (surfaced
//! as-is). Rules, first match wins:
//! - timeouts and cancellations are retryable
//! - transport failures and 5xx responses are retryable
//! - untyped failures are retryable when their message mentions a status or
//!   transport marker
//! - everything else, including 4xx and malformed requests, is not

use crate::errors::ProviderError;

/// Substrings that mark an untyped failure as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "network",
    "timeout",
    "connection",
];

/// Transient verdict attached to a caught provider failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureClassification {
    pub is_retryable: bool,
    pub suggest_fallback: bool,
    pub origin_message: String,
}

/// Whether a failure warrants retrying on an alternate provider
pub fn should_use_fallback(err: &ProviderError) -> bool {
    match err {
        ProviderError::Timeout { .. } | ProviderError::Cancelled { .. } => true,
        ProviderError::Network { .. } | ProviderError::Http { .. } => true,
        ProviderError::Unknown { message, .. } => mentions_transient_marker(message),
        ProviderError::Client { .. }
        | ProviderError::Configuration { .. }
        | ProviderError::Decode { .. } => false,
    }
}

/// Classify a failure given whether an alternate provider is available
pub fn classify(err: &ProviderError, fallback_available: bool) -> FailureClassification {
    let is_retryable = should_use_fallback(err);
    FailureClassification {
        is_retryable,
        suggest_fallback: is_retryable && fallback_available,
        origin_message: err.to_string(),
    }
}

fn mentions_transient_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use trialdoc_common::ProviderKind;

    fn unknown(message: &str) -> ProviderError {
        ProviderError::Unknown {
            provider: ProviderKind::Primary,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_transient_failures_fall_back() {
        let service_unavailable =
            ProviderError::from_status(ProviderKind::Primary, StatusCode::SERVICE_UNAVAILABLE, "");
        let aborted = ProviderError::Timeout {
            provider: ProviderKind::Primary,
            timeout_ms: 120_000,
        };
        let cancelled = ProviderError::Cancelled {
            provider: ProviderKind::Primary,
        };

        assert!(should_use_fallback(&service_unavailable));
        assert!(should_use_fallback(&aborted));
        assert!(should_use_fallback(&cancelled));
        assert!(should_use_fallback(&unknown("Upstream TIMEOUT while reading")));
        assert!(should_use_fallback(&unknown("Connection reset by peer")));
        assert!(should_use_fallback(&unknown("gateway said 502")));
    }

    #[test]
    fn test_client_errors_do_not_fall_back() {
        let bad_request = ProviderError::from_status(ProviderKind::Primary, StatusCode::BAD_REQUEST, "missing message");
        assert!(!should_use_fallback(&bad_request));

        // A 4xx body mentioning a marker is still a request bug
        let bad_param = ProviderError::from_status(ProviderKind::Primary, StatusCode::UNPROCESSABLE_ENTITY, "invalid timeout value");
        assert!(!should_use_fallback(&bad_param));

        assert!(!should_use_fallback(&ProviderError::decode(ProviderKind::Primary, "expected `response`")));
        assert!(!should_use_fallback(&unknown("something odd happened")));
    }

    #[test]
    fn test_classification_requires_available_fallback() {
        let err = ProviderError::Network {
            provider: ProviderKind::Primary,
            message: "dns error".to_string(),
        };

        let with_fallback = classify(&err, true);
        assert!(with_fallback.is_retryable);
        assert!(with_fallback.suggest_fallback);
        assert!(with_fallback.origin_message.contains("dns error"));

        let without_fallback = classify(&err, false);
        assert!(without_fallback.is_retryable);
        assert!(!without_fallback.suggest_fallback);
    }
}
