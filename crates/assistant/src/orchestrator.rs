//! Fallback orchestrator
//!
//! Single entry point for document questions. Providers are tried strictly in
//! sequence:
//! 1. forced third party: the document-chat provider answers directly
//! 2. primary backend under its own deadline
//! 3. on a transient primary failure, the document-chat provider if available
//!
//! A failure of both is terminal for the call. The manual fallback path runs
//! step 3 alone. One cancellation token covers the whole chain; once it fires
//! no further provider is attempted.

use crate::classify::classify;
use crate::errors::{ProviderError, QueryError};
use crate::normalizer::{normalize_document_chat, normalize_llm, normalize_primary};
use crate::providers::{ChatOptions, DocumentChat, DocumentChunk, LlmAnswerer, PrimaryBackend, PrimaryQuery};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use trialdoc_common::{metrics, AppConfig, DocumentInfo, ProviderKind, UnifiedResponse};

/// Orchestration knobs derived from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Route every query to the document-chat provider
    pub third_party_as_primary: bool,

    /// Primary backend deadline when the request sets none
    pub default_timeout: Duration,

    pub default_limit: u32,

    /// Run the citation extraction assist on document-chat answers
    pub extract_sources: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            third_party_as_primary: config.third_party.use_as_primary,
            default_timeout: Duration::from_millis(config.primary.query_timeout_ms),
            default_limit: config.primary.default_limit,
            extract_sources: config.third_party.extract_sources,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// One logical question about a document
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub message: String,
    pub document_id: Option<String>,

    /// Metadata from the document store; needed to register the document
    /// with the document-chat provider
    pub document: Option<DocumentInfo>,

    /// Opaque bearer token, passed through to the primary backend
    pub credential: String,
    pub user_id: String,
    pub limit: Option<u32>,
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            credential: credential.into(),
            user_id: "anonymous".to_string(),
            ..Self::default()
        }
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_document(mut self, document: DocumentInfo) -> Self {
        self.document_id.get_or_insert_with(|| document.id.clone());
        self.document = Some(document);
        self
    }

    fn effective_document_id(&self) -> Option<&str> {
        self.document_id
            .as_deref()
            .or_else(|| self.document.as_ref().map(|d| d.id.as_str()))
    }
}

/// Which providers are configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub primary_configured: bool,
    pub fallback_configured: bool,
    pub llm_configured: bool,
    pub third_party_as_primary: bool,
}

/// Multi-provider query orchestrator
pub struct QueryOrchestrator {
    primary: Arc<dyn PrimaryBackend>,
    fallback: Option<Arc<dyn DocumentChat>>,
    llm: Option<Arc<dyn LlmAnswerer>>,
    settings: OrchestratorSettings,
}

impl QueryOrchestrator {
    pub fn new(primary: Arc<dyn PrimaryBackend>, settings: OrchestratorSettings) -> Self {
        Self {
            primary,
            fallback: None,
            llm: None,
            settings,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn DocumentChat>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmAnswerer>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Whether a fallback can be offered at all
    pub fn fallback_available(&self) -> bool {
        self.available_fallback().is_some()
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            primary_configured: self.primary.is_configured(),
            fallback_configured: self.fallback_available(),
            llm_configured: self.llm.as_ref().is_some_and(|llm| llm.is_configured()),
            third_party_as_primary: self.settings.third_party_as_primary,
        }
    }

    fn available_fallback(&self) -> Option<&Arc<dyn DocumentChat>> {
        self.fallback.as_ref().filter(|chat| chat.is_configured())
    }

    /// Answer a question, falling back automatically on transient primary failures
    #[instrument(skip_all, fields(document_id = request.effective_document_id()))]
    pub async fn query(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResponse, QueryError> {
        if self.settings.third_party_as_primary {
            if !self.fallback_available() {
                return Err(QueryError::Configuration {
                    message: "third-party provider is set as primary but has no API key".to_string(),
                });
            }
            info!("Routing query to the document chat provider");
            metrics::record_fallback("forced");
            return self
                .run_fallback(request, cancel)
                .await
                .map_err(|e| wrap(e, |source| QueryError::Fallback { source }));
        }

        let primary_err = match self.run_primary(request, cancel).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if cancel.is_cancelled() || matches!(primary_err, ProviderError::Cancelled { .. }) {
            info!("Query cancelled, skipping fallback");
            return Err(QueryError::Cancelled);
        }

        let classification = classify(&primary_err, self.fallback_available());
        if !classification.suggest_fallback {
            warn!(
                error = %primary_err,
                retryable = classification.is_retryable,
                fallback_available = self.fallback_available(),
                "Primary backend failed without fallback"
            );
            return Err(QueryError::Primary {
                can_retry: classification.is_retryable,
                suggest_fallback: self.fallback_available(),
                source: primary_err,
            });
        }

        warn!(error = %primary_err, "Primary backend unavailable, falling back");
        metrics::record_fallback("automatic");

        match self.run_fallback(request, cancel).await {
            Ok(response) => Ok(response),
            Err(ProviderError::Cancelled { .. }) => Err(QueryError::Cancelled),
            Err(fallback_err) => {
                let err = QueryError::BothFailed {
                    primary: primary_err,
                    fallback: fallback_err,
                };
                warn!(error = %err, "Both providers failed");
                Err(err)
            }
        }
    }

    /// Ask the document-chat provider directly, after the caller was offered a fallback
    #[instrument(skip_all, fields(document_id = request.effective_document_id()))]
    pub async fn query_fallback(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResponse, QueryError> {
        if !self.fallback_available() {
            return Err(QueryError::Configuration {
                message: "no fallback provider is configured".to_string(),
            });
        }

        metrics::record_fallback("manual");
        self.run_fallback(request, cancel)
            .await
            .map_err(|e| wrap(e, |source| QueryError::Fallback { source }))
    }

    /// Answer from caller-supplied chunks with the LLM citation service
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn query_llm(
        &self,
        request: &QueryRequest,
        chunks: &[DocumentChunk],
        cancel: &CancellationToken,
    ) -> Result<UnifiedResponse, QueryError> {
        let Some(llm) = self.llm.as_ref().filter(|llm| llm.is_configured()) else {
            return Err(QueryError::Configuration {
                message: "LLM citation service is not configured".to_string(),
            });
        };

        let answer = llm
            .answer_from_chunks(&request.message, chunks, cancel)
            .await
            .map_err(|e| wrap(e, |source| QueryError::Llm { source }))?;

        let response = normalize_llm(&answer, chunks, ProviderKind::Llm, request.document.as_ref());
        info!(
            citations = response.citations.len(),
            cost = answer.cost,
            model = %answer.model,
            "LLM answered"
        );
        Ok(response)
    }

    async fn run_primary(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResponse, ProviderError> {
        let query = PrimaryQuery {
            message: &request.message,
            document_id: request.effective_document_id(),
            credential: &request.credential,
            user_id: &request.user_id,
            limit: request.limit.unwrap_or(self.settings.default_limit),
            timeout: request.timeout.unwrap_or(self.settings.default_timeout),
        };

        let answer = self.primary.send(&query, cancel).await?;
        let response = normalize_primary(&answer, request.document.as_ref());
        info!(citations = response.citations.len(), "Answered by primary backend");
        Ok(response)
    }

    async fn run_fallback(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<UnifiedResponse, ProviderError> {
        let chat = self.available_fallback().ok_or_else(|| {
            ProviderError::configuration(ProviderKind::Fallback, "no API key configured")
        })?;

        let document = match (&request.document, request.document_id.as_deref()) {
            (Some(document), _) => document.clone(),
            (None, Some(id)) => DocumentInfo::new(id, id),
            (None, None) => {
                return Err(ProviderError::configuration(
                    ProviderKind::Fallback,
                    "a document is required to query the document chat provider",
                ))
            }
        };

        let source_id = chat.ensure_source(&document, cancel).await?;
        let options = ChatOptions {
            extract_sources: self.settings.extract_sources,
            document: request.document.clone(),
            ..ChatOptions::default()
        };
        let answer = chat.query(&source_id, &request.message, &options, cancel).await?;

        let response = normalize_document_chat(&answer, ProviderKind::Fallback, Some(&document));
        info!(
            citations = response.citations.len(),
            degraded = response.citations_degraded,
            "Answered by document chat provider"
        );
        Ok(response)
    }
}

/// Cancellation surfaces as such regardless of which provider saw it
fn wrap(err: ProviderError, into: impl FnOnce(ProviderError) -> QueryError) -> QueryError {
    match err {
        ProviderError::Cancelled { .. } => QueryError::Cancelled,
        other => into(other),
    }
}
