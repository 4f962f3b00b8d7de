//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use trialdoc_common::{config::RateLimitConfig, errors::AppError};

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Shared limiter plus the configured rate, for error reporting
#[derive(Clone)]
pub struct QueryRateLimit {
    limiter: Arc<GlobalRateLimiter>,
    requests_per_second: u32,
}

impl QueryRateLimit {
    /// `None` when limiting is disabled or the quota is zero
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let rate = NonZeroU32::new(config.requests_per_second)?;
        let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Some(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            requests_per_second: config.requests_per_second,
        })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limit): State<QueryRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limit.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.requests_per_second,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limit = QueryRateLimit::from_config(&RateLimitConfig::default()).unwrap();
        assert!(limit.limiter.check().is_ok());
        assert_eq!(limit.requests_per_second, 20);
    }

    #[test]
    fn test_disabled_or_zero_quota() {
        let disabled = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        assert!(QueryRateLimit::from_config(&disabled).is_none());

        let zero = RateLimitConfig {
            requests_per_second: 0,
            ..RateLimitConfig::default()
        };
        assert!(QueryRateLimit::from_config(&zero).is_none());
    }

    #[test]
    fn test_burst_is_exhausted() {
        let config = RateLimitConfig {
            requests_per_second: 1,
            burst: 2,
            enabled: true,
        };
        let limit = QueryRateLimit::from_config(&config).unwrap();
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_err());
    }
}
