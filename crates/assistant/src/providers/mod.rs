//! Provider client abstraction
//!
//! One client per backend, each knowing only its own endpoint and response
//! shape:
//! - `primary`: internal RAG query backend
//! - `third_party`: document-chat API with source registration
//! - `llm`: LLM citation service with token cost accounting
//!
//! The orchestrator holds clients through the traits below so tests can
//! substitute in-memory fakes.

pub mod llm;
pub mod primary;
pub mod third_party;

use crate::errors::ProviderError;
use crate::normalizer::RawCitation;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trialdoc_common::{DocumentInfo, ProviderKind, UnifiedCitation};

pub use llm::{ChunkCitation, DocumentChunk, LlmAnswer, LlmCitationClient, TokenRates, TokenUsage};
pub use primary::PrimaryBackendClient;
pub use third_party::DocumentChatClient;

/// One question for the primary backend
#[derive(Debug, Clone)]
pub struct PrimaryQuery<'a> {
    pub message: &'a str,
    pub document_id: Option<&'a str>,
    pub credential: &'a str,
    pub user_id: &'a str,
    pub limit: u32,
    pub timeout: Duration,
}

/// Raw primary backend answer before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimaryAnswer {
    pub text: String,
    pub raw_sources: Vec<RawCitation>,
}

/// Trait for the primary query backend
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Whether the required configuration is present; never touches the network
    fn is_configured(&self) -> bool;

    /// Ask a question, cancelling the request once `query.timeout` elapses
    async fn send(
        &self,
        query: &PrimaryQuery<'_>,
        cancel: &CancellationToken,
    ) -> Result<PrimaryAnswer, ProviderError>;
}

/// Per-query options for the document-chat provider
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Run the citation extraction assist on the answer
    pub extract_sources: bool,

    /// Overrides the configured sampling temperature
    pub temperature: Option<f32>,

    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,

    /// Document metadata, required by the extraction assist
    pub document: Option<DocumentInfo>,
}

/// Document-chat answer; citations are set only when the extraction assist succeeded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatAnswer {
    pub content: String,
    pub page_references: Vec<i64>,
    pub citations: Option<Vec<UnifiedCitation>>,
    pub citations_degraded: bool,
}

/// Trait for the third-party document-chat provider
#[async_trait]
pub trait DocumentChat: Send + Sync {
    /// Whether the required credentials are present; never touches the network
    fn is_configured(&self) -> bool;

    /// Provider source id for a document, registering it on first use
    async fn ensure_source(
        &self,
        document: &DocumentInfo,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;

    /// Ask a single-turn question against a registered source
    async fn query(
        &self,
        source_id: &str,
        message: &str,
        options: &ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatAnswer, ProviderError>;
}

/// Trait for the LLM citation service answering from caller-supplied chunks
#[async_trait]
pub trait LlmAnswerer: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn answer_from_chunks(
        &self,
        question: &str,
        chunks: &[DocumentChunk],
        cancel: &CancellationToken,
    ) -> Result<LlmAnswer, ProviderError>;
}

/// Run one provider call under its own timer and the caller's cancellation token.
///
/// Dropping the inner future aborts the in-flight HTTP request.
pub(crate) async fn with_deadline<T, F>(
    provider: ProviderKind,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled { provider }),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider,
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
    }
}

/// Build the shared HTTP client for a provider
pub(crate) fn http_client(provider: ProviderKind) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(concat!("trialdoc/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::configuration(provider, format!("Failed to create HTTP client: {}", e)))
}
