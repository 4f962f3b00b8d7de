//! Source-ID cache administration
//!
//! Handles are never refreshed automatically; a stale one is invalidated here.

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use trialdoc_common::{
    auth::BearerCredential,
    errors::{AppError, Result},
    models::ProviderSourceHandle,
};

#[derive(Serialize)]
pub struct SourcesResponse {
    pub count: usize,
    pub sources: Vec<ProviderSourceHandle>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// List cached source handles
pub async fn list_sources(
    State(state): State<AppState>,
    _credential: BearerCredential,
) -> Json<SourcesResponse> {
    let sources = state.sources.handles().await;
    Json(SourcesResponse {
        count: sources.len(),
        sources,
    })
}

/// Drop every cached handle
pub async fn clear_sources(
    State(state): State<AppState>,
    credential: BearerCredential,
) -> Json<ClearResponse> {
    let cleared = state.sources.clear().await;
    tracing::info!(request_id = %credential.request_id, cleared, "Source cache cleared");
    Json(ClearResponse { cleared })
}

/// Invalidate one document's handle
pub async fn remove_source(
    State(state): State<AppState>,
    credential: BearerCredential,
    Path(document_id): Path<String>,
) -> Result<StatusCode> {
    if !state.sources.remove(&document_id).await {
        return Err(AppError::SourceNotFound { document_id });
    }

    tracing::info!(request_id = %credential.request_id, document_id = %document_id, "Source handle invalidated");
    Ok(StatusCode::NO_CONTENT)
}
