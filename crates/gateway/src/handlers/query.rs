//! Query handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use trialdoc_assistant::{providers::DocumentChunk, QueryError, QueryRequest};
use trialdoc_common::{
    auth::BearerCredential,
    errors::{AppError, Result},
    metrics::RequestMetrics,
    models::DocumentMetadata,
    UnifiedResponse,
};

/// Document question
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    #[validate(length(min = 1, max = 256))]
    pub document_id: String,

    /// Record from the document metadata store
    #[serde(default)]
    pub document_metadata: Option<DocumentMetadata>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    #[validate(range(min = 1, max = 50))]
    pub result_limit: Option<u32>,

    #[serde(default)]
    #[validate(range(min = 1000, max = 600000))]
    pub timeout_ms: Option<u64>,
}

impl QueryBody {
    fn into_request(self, credential: BearerCredential) -> QueryRequest {
        let mut request = QueryRequest::new(self.message, credential.token);
        if let Some(metadata) = self.document_metadata {
            request = request.with_document(metadata.into_document(self.document_id.clone()));
        }
        request = request.with_document_id(self.document_id);
        if let Some(user_id) = self.user_id.filter(|id| !id.trim().is_empty()) {
            request.user_id = user_id;
        }
        request.limit = self.result_limit;
        request.timeout = self.timeout_ms.map(Duration::from_millis);
        request
    }
}

/// Question answered from caller-supplied document chunks
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LlmQueryBody {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    #[serde(default)]
    pub document_id: Option<String>,

    #[serde(default)]
    pub document_metadata: Option<DocumentMetadata>,

    #[validate(length(min = 1, max = 200))]
    pub chunks: Vec<DocumentChunk>,
}

fn validate(body: &impl Validate) -> Result<()> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })
}

fn finish(metrics: RequestMetrics, result: std::result::Result<UnifiedResponse, QueryError>) -> Result<Json<UnifiedResponse>> {
    if let Err(e) = &result {
        tracing::warn!(provider = ?e.origin(), error = %e, "Query failed");
    }
    let result = result.map_err(AppError::from);
    metrics.finish(match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    });
    result.map(Json)
}

/// Orchestrated query with automatic fallback
pub async fn query(
    State(state): State<AppState>,
    credential: BearerCredential,
    Json(body): Json<QueryBody>,
) -> Result<Json<UnifiedResponse>> {
    validate(&body)?;
    let metrics = RequestMetrics::start("POST", "/v2/query");
    tracing::info!(request_id = %credential.request_id, document_id = %body.document_id, "Query received");

    let request = body.into_request(credential);
    let cancel = state.request_token();
    finish(metrics, state.orchestrator.query(&request, &cancel).await)
}

/// Manual fallback, issued after the caller was offered one
pub async fn query_fallback(
    State(state): State<AppState>,
    credential: BearerCredential,
    Json(body): Json<QueryBody>,
) -> Result<Json<UnifiedResponse>> {
    validate(&body)?;
    let metrics = RequestMetrics::start("POST", "/v2/query/fallback");
    tracing::info!(request_id = %credential.request_id, document_id = %body.document_id, "Manual fallback requested");

    let request = body.into_request(credential);
    let cancel = state.request_token();
    finish(metrics, state.orchestrator.query_fallback(&request, &cancel).await)
}

/// Direct LLM query over supplied chunks
pub async fn query_llm(
    State(state): State<AppState>,
    credential: BearerCredential,
    Json(body): Json<LlmQueryBody>,
) -> Result<Json<UnifiedResponse>> {
    validate(&body)?;
    let metrics = RequestMetrics::start("POST", "/v2/query/llm");

    let mut request = QueryRequest::new(body.message, credential.token);
    if let Some(metadata) = body.document_metadata {
        let id = body.document_id.clone().unwrap_or_default();
        request = request.with_document(metadata.into_document(id));
    } else if let Some(id) = body.document_id {
        request = request.with_document_id(id);
    }

    let cancel = state.request_token();
    finish(metrics, state.orchestrator.query_llm(&request, &body.chunks, &cancel).await)
}
