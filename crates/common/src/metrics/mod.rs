//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for provider calls, fallbacks and
//! citation quality with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all TrialDoc metrics
pub const METRICS_PREFIX: &str = "trialdoc";

/// Buckets for provider latency (upstream models are slow)
pub const PROVIDER_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 120s - primary timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Provider metrics
    describe_counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total provider calls by outcome"
    );

    describe_histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Provider call latency in seconds"
    );

    describe_counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Queries answered through the fallback provider"
    );

    describe_counter!(
        format!("{}_degraded_citations_total", METRICS_PREFIX),
        Unit::Count,
        "Responses that used coarse page citations after the extraction assist failed"
    );

    describe_counter!(
        format!("{}_llm_cost_microdollars_total", METRICS_PREFIX),
        Unit::Count,
        "Approximate LLM spend in micro-dollars"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a provider call
pub fn record_provider_call(provider: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a fallback; `trigger` is `automatic`, `manual` or `forced`
pub fn record_fallback(trigger: &str) {
    counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

/// Helper to record a citation degrade
pub fn record_degraded_citations(provider: &str) {
    counter!(
        format!("{}_degraded_citations_total", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .increment(1);
}

/// Helper to record LLM spend, stored in micro-dollars so the counter stays integral
pub fn record_llm_cost(model: &str, cost_usd: f64) {
    counter!(
        format!("{}_llm_cost_microdollars_total", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .increment((cost_usd * 1e6).round() as u64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
