//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::time::Instant;
use trialdoc_assistant::ProviderStatus;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
    pub providers: ProviderStatus,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub primary: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: trialdoc_common::VERSION.to_string(),
    })
}

/// Readiness probe - primary backend connectivity plus provider configuration
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let providers = state.orchestrator.status();

    let primary = if providers.primary_configured {
        let start = Instant::now();
        if state.primary.health_check().await {
            CheckResult {
                status: "up".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        } else {
            CheckResult {
                status: "down".to_string(),
                latency_ms: None,
            }
        }
    } else {
        CheckResult {
            status: "not_configured".to_string(),
            latency_ms: None,
        }
    };

    // Forced third party does not depend on the primary backend
    let ready = if providers.third_party_as_primary {
        providers.fallback_configured
    } else {
        primary.status == "up" || providers.fallback_configured
    };

    Json(ReadyResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks { primary },
        providers,
    })
}

/// Which providers are configured
pub async fn providers(State(state): State<AppState>) -> Json<ProviderStatus> {
    Json(state.orchestrator.status())
}
