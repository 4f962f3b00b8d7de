//! Third-party document-chat client
//!
//! Documents are registered once (by URL, or explicitly by file upload) and
//! then queried by the provider's source id. Answers carry coarse page
//! references; when requested, an extraction assist replaces them with
//! precise citations. A failing assist degrades to the coarse references and
//! never fails the query.

use super::{with_deadline, ChatAnswer, ChatOptions, DocumentChat};
use crate::citation_assist::CitationExtractor;
use crate::errors::ProviderError;
use crate::source_cache::SourceIdCache;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trialdoc_common::{
    config::{PromptsConfig, ThirdPartyConfig},
    metrics,
    models::ProviderSourceHandle,
    DocumentInfo, ProviderKind,
};

const PROVIDER: ProviderKind = ProviderKind::Fallback;

#[derive(Serialize)]
struct AddUrlBody<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceReply {
    #[serde(alias = "source_id")]
    source_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody<'a> {
    source_id: &'a str,
    messages: Vec<ChatMessage>,
    reference_sources: bool,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
    #[serde(default)]
    references: Option<Vec<serde_json::Value>>,
}

/// HTTP client for the document-chat provider
pub struct DocumentChatClient {
    client: reqwest::Client,
    config: ThirdPartyConfig,
    prompts: PromptsConfig,
    cache: Arc<SourceIdCache>,
    extractor: Option<Arc<dyn CitationExtractor>>,
}

impl DocumentChatClient {
    pub fn new(
        config: ThirdPartyConfig,
        prompts: PromptsConfig,
        cache: Arc<SourceIdCache>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::http_client(PROVIDER)?,
            config,
            prompts,
            cache,
            extractor: None,
        })
    }

    /// Attach the citation extraction assist
    pub fn with_extractor(mut self, extractor: Arc<dyn CitationExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::configuration(PROVIDER, "API key is not set"))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn read_source_reply(response: reqwest::Response, timeout_ms: u64) -> Result<String, ProviderError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout_ms))?;
        if !status.is_success() {
            return Err(ProviderError::from_status(PROVIDER, status, &text));
        }

        let reply: SourceReply = serde_json::from_str(&text)
            .map_err(|e| ProviderError::decode(PROVIDER, e.to_string()))?;
        debug!(source_id = %reply.source_id, status = ?reply.status, "Source registered");
        Ok(reply.source_id)
    }

    #[instrument(skip(self, cancel))]
    async fn add_url(&self, url: &str, cancel: &CancellationToken) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let timeout = self.default_timeout();
        let timeout_ms = timeout.as_millis() as u64;

        let call = async {
            let response = self
                .client
                .post(self.endpoint("/sources/add-url"))
                .header("x-api-key", api_key)
                .json(&AddUrlBody { url })
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout_ms))?;
            Self::read_source_reply(response, timeout_ms).await
        };

        let started = Instant::now();
        let result = with_deadline(PROVIDER, timeout, cancel, call).await;
        metrics::record_provider_call(PROVIDER.as_str(), started.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    /// Register a document by uploading its bytes; the handle is cached on success
    #[instrument(skip(self, bytes, cancel), fields(document_id = %document.id, size = bytes.len()))]
    pub async fn register_file(
        &self,
        document: &DocumentInfo,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let timeout = self.default_timeout();
        let timeout_ms = timeout.as_millis() as u64;

        let mime = document.mime_type.as_deref().unwrap_or("application/pdf");
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(document.name.clone())
            .mime_str(mime)
            .map_err(|e| ProviderError::configuration(PROVIDER, format!("invalid mime type {}: {}", mime, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let call = async {
            let response = self
                .client
                .post(self.endpoint("/sources/add-file"))
                .header("x-api-key", api_key)
                .multipart(form)
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout_ms))?;
            Self::read_source_reply(response, timeout_ms).await
        };

        let source_id = with_deadline(PROVIDER, timeout, cancel, call).await?;
        self.cache
            .insert(ProviderSourceHandle {
                document_id: document.id.clone(),
                source_id: source_id.clone(),
            })
            .await;

        info!(source_id = %source_id, "Document registered by file upload");
        Ok(source_id)
    }

    /// Replace coarse references with extracted citations, degrading on failure
    async fn assist(
        &self,
        question: &str,
        answer: &mut ChatAnswer,
        document: &DocumentInfo,
        cancel: &CancellationToken,
    ) {
        let Some(extractor) = &self.extractor else {
            debug!("Citation extraction requested but no extractor is attached");
            return;
        };

        match extractor
            .extract(question, &answer.content, document, &answer.page_references, cancel)
            .await
        {
            Ok(citations) => {
                debug!(count = citations.len(), "Extracted citations");
                answer.citations = Some(citations);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    document_id = %document.id,
                    pages = answer.page_references.len(),
                    "Citation extraction failed, using page references"
                );
                metrics::record_degraded_citations(PROVIDER.as_str());
                answer.citations = None;
                answer.citations_degraded = true;
            }
        }
    }
}

/// Page numbers from the reference list, skipping entries without one
fn page_references(references: &[serde_json::Value]) -> Vec<i64> {
    references
        .iter()
        .filter_map(|reference| {
            reference
                .get("pageNumber")
                .or_else(|| reference.get("page_number"))
                .or_else(|| reference.get("page"))
                .and_then(serde_json::Value::as_i64)
        })
        .collect()
}

#[async_trait]
impl DocumentChat for DocumentChatClient {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    #[instrument(skip(self, cancel), fields(document_id = %document.id))]
    async fn ensure_source(
        &self,
        document: &DocumentInfo,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        if let Some(source_id) = self.cache.get(&document.id).await {
            metrics::record_cache(true, "source_id");
            return Ok(source_id);
        }

        let Some(url) = document.url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Err(ProviderError::configuration(
                PROVIDER,
                format!(
                    "document {} has no URL; register it by file upload before querying",
                    document.id
                ),
            ));
        };

        self.cache
            .get_or_register(&document.id, || self.add_url(url, cancel))
            .await
    }

    #[instrument(skip(self, message, options, cancel))]
    async fn query(
        &self,
        source_id: &str,
        message: &str,
        options: &ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatAnswer, ProviderError> {
        let api_key = self.api_key()?;
        let timeout = options.timeout.unwrap_or_else(|| self.default_timeout());
        let timeout_ms = timeout.as_millis() as u64;

        let body = ChatBody {
            source_id,
            messages: vec![ChatMessage {
                role: "user",
                content: self.prompts.render_third_party(message),
            }],
            reference_sources: true,
            temperature: options.temperature.unwrap_or(self.config.temperature),
            stream: false,
        };

        let call = async {
            let response = self
                .client
                .post(self.endpoint("/chats/message"))
                .header("x-api-key", api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout_ms))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout_ms))?;
            if !status.is_success() {
                return Err(ProviderError::from_status(PROVIDER, status, &text));
            }

            serde_json::from_str::<ChatReply>(&text).map_err(|e| ProviderError::decode(PROVIDER, e.to_string()))
        };

        let started = Instant::now();
        let result = with_deadline(PROVIDER, timeout, cancel, call).await;
        metrics::record_provider_call(PROVIDER.as_str(), started.elapsed().as_secs_f64(), result.is_ok());

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Document chat call failed");
                return Err(e);
            }
        };

        let mut answer = ChatAnswer {
            page_references: page_references(reply.references.as_deref().unwrap_or_default()),
            content: reply.content,
            citations: None,
            citations_degraded: false,
        };
        info!(references = answer.page_references.len(), "Document chat answered");

        if options.extract_sources {
            if let Some(document) = &options.document {
                self.assist(message, &mut answer, document, cancel).await;
            }
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trialdoc_common::{config::FORMAT_INSTRUCTION, Relevance, UnifiedCitation};
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingExtractor;

    #[async_trait]
    impl CitationExtractor for FailingExtractor {
        async fn extract(
            &self,
            _question: &str,
            _answer: &str,
            _document: &DocumentInfo,
            _coarse_pages: &[i64],
            _cancel: &CancellationToken,
        ) -> Result<Vec<UnifiedCitation>, ProviderError> {
            Err(ProviderError::decode(ProviderKind::Llm, "not json"))
        }
    }

    struct FixedExtractor;

    #[async_trait]
    impl CitationExtractor for FixedExtractor {
        async fn extract(
            &self,
            _question: &str,
            _answer: &str,
            _document: &DocumentInfo,
            _coarse_pages: &[i64],
            _cancel: &CancellationToken,
        ) -> Result<Vec<UnifiedCitation>, ProviderError> {
            Ok(vec![UnifiedCitation {
                page: 12,
                section: "Exclusion Criteria".to_string(),
                exact_text: "Prior chemotherapy".to_string(),
                relevance: Relevance::High,
                context: "Listed as exclusion".to_string(),
                highlight_url: "#page=12".to_string(),
                bounding_boxes: None,
                source_name: None,
            }])
        }
    }

    fn client_for(server: &MockServer) -> DocumentChatClient {
        let config = ThirdPartyConfig {
            base_url: server.uri(),
            api_key: Some("sec_test".to_string()),
            ..ThirdPartyConfig::default()
        };
        DocumentChatClient::new(config, PromptsConfig::default(), Arc::new(SourceIdCache::new())).unwrap()
    }

    fn protocol() -> DocumentInfo {
        DocumentInfo::new("doc1", "Protocol").with_url("https://files.example.org/abc.pdf")
    }

    async fn mount_chat(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/chats/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "Prior chemotherapy is excluded.",
                "references": [{"pageNumber": 11}, {"pageNumber": 12}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_ensure_source_uploads_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sources/add-url"))
            .and(header("x-api-key", "sec_test"))
            .and(body_json(json!({"url": "https://files.example.org/abc.pdf"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sourceId": "src_abc", "status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let first = client.ensure_source(&protocol(), &cancel).await.unwrap();
        let second = client.ensure_source(&protocol(), &cancel).await.unwrap();

        assert_eq!(first, "src_abc");
        assert_eq!(second, "src_abc");
    }

    #[tokio::test]
    async fn test_missing_url_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client_for(&server)
            .ensure_source(&DocumentInfo::new("doc2", "No URL"), &CancellationToken::new())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration { .. }));
        assert!(err.to_string().contains("doc2"));
    }

    #[tokio::test]
    async fn test_register_file_populates_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sources/add-file"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sourceId": "src_file"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let document = DocumentInfo::new("doc3", "protocol.pdf");

        let source_id = client.register_file(&document, b"%PDF-1.7".to_vec(), &cancel).await.unwrap();
        assert_eq!(source_id, "src_file");

        // Cached handle serves documents without a URL
        assert_eq!(client.ensure_source(&document, &cancel).await.unwrap(), "src_file");
    }

    #[tokio::test]
    async fn test_query_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats/message"))
            .and(body_partial_json(json!({
                "sourceId": "src_abc",
                "referenceSources": true,
                "temperature": 0.3,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "Answer.",
                "references": [{"pageNumber": 5}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let answer = client_for(&server)
            .query("src_abc", "Dosing schedule?", &ChatOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer.content, "Answer.");
        assert_eq!(answer.page_references, vec![5]);
        assert!(answer.citations.is_none());

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let content = sent["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("Dosing schedule?"));
        assert!(content.contains(FORMAT_INSTRUCTION));
        assert_eq!(sent["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_assist_failure_degrades() {
        let server = MockServer::start().await;
        mount_chat(&server).await;

        let client = client_for(&server).with_extractor(Arc::new(FailingExtractor));
        let options = ChatOptions {
            extract_sources: true,
            document: Some(protocol()),
            ..ChatOptions::default()
        };

        let answer = client
            .query("src_abc", "Exclusions?", &options, &CancellationToken::new())
            .await
            .unwrap();

        assert!(answer.citations.is_none());
        assert!(answer.citations_degraded);
        assert_eq!(answer.page_references, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_assist_success_replaces_references() {
        let server = MockServer::start().await;
        mount_chat(&server).await;

        let client = client_for(&server).with_extractor(Arc::new(FixedExtractor));
        let options = ChatOptions {
            extract_sources: true,
            document: Some(protocol()),
            ..ChatOptions::default()
        };

        let answer = client
            .query("src_abc", "Exclusions?", &options, &CancellationToken::new())
            .await
            .unwrap();

        let citations = answer.citations.unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].page, 12);
        assert!(!answer.citations_degraded);
    }

    #[tokio::test]
    async fn test_client_error_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chats/message"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown sourceId"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .query("src_gone", "q", &ChatOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Client { status: 400, .. })));
    }
}
