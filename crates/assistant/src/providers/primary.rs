//! Primary query backend client
//!
//! Internal RAG backend: `POST {base}/query` with Bearer auth. The question is
//! wrapped with the configured primary prompt template, which carries the
//! page/section citation instruction.

use super::{with_deadline, PrimaryAnswer, PrimaryBackend, PrimaryQuery};
use crate::errors::ProviderError;
use crate::normalizer::parse_raw_citations;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trialdoc_common::{
    config::{PrimaryBackendConfig, PromptsConfig},
    metrics,
    models::HighlightRequest,
    ProviderKind,
};

const PROVIDER: ProviderKind = ProviderKind::Primary;

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    message: String,
    user_id: &'a str,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_ids: Option<Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct QueryReply {
    response: String,
    #[serde(default)]
    sources: Option<serde_json::Value>,
}

/// HTTP client for the primary query backend
#[derive(Clone)]
pub struct PrimaryBackendClient {
    client: reqwest::Client,
    config: PrimaryBackendConfig,
    prompts: PromptsConfig,
}

impl PrimaryBackendClient {
    pub fn new(config: PrimaryBackendConfig, prompts: PromptsConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::http_client(PROVIDER)?,
            config,
            prompts,
        })
    }

    fn base_url(&self) -> Result<&str, ProviderError> {
        self.config
            .base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::configuration(PROVIDER, "API base URL is not set"))
    }

    /// Connectivity check; any failure counts as unhealthy
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> bool {
        let Ok(base) = self.base_url() else {
            return false;
        };

        let timeout = Duration::from_millis(self.config.health_timeout_ms);
        match self
            .client
            .get(format!("{}/health", base))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(status = %response.status(), healthy, "Primary backend health check");
                healthy
            }
            Err(e) => {
                warn!(error = %e, "Primary backend health check failed");
                false
            }
        }
    }

    /// Fetch a PDF with the requested passage highlighted
    #[instrument(skip(self, credential, request, cancel), fields(page = request.page))]
    pub async fn fetch_highlighted_pdf(
        &self,
        credential: &str,
        document_url: &str,
        request: &HighlightRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ProviderError> {
        let base = self.base_url()?;
        let timeout = Duration::from_millis(self.config.pdf_fetch_timeout_ms);

        let mut params = vec![
            ("doc", document_url.to_string()),
            ("page", request.page.to_string()),
            ("searchText", request.search_text.clone()),
        ];
        if let Some(boxes) = &request.bounding_boxes {
            let encoded = serde_json::to_string(boxes)
                .map_err(|e| ProviderError::decode(PROVIDER, e.to_string()))?;
            params.push(("bboxes", encoded));
        }

        let call = async {
            let mut builder = self
                .client
                .get(format!("{}/query/highlighted-pdf", base))
                .query(&params);
            if !credential.is_empty() {
                builder = builder.bearer_auth(credential);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout.as_millis() as u64))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(PROVIDER, status, &body));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, e, timeout.as_millis() as u64))?;
            Ok(bytes.to_vec())
        };

        with_deadline(PROVIDER, timeout, cancel, call).await
    }

    async fn post_query(&self, query: &PrimaryQuery<'_>) -> Result<PrimaryAnswer, ProviderError> {
        let base = self.base_url()?;
        let timeout_ms = query.timeout.as_millis() as u64;

        let body = QueryBody {
            message: self.prompts.render_primary(query.message),
            user_id: query.user_id,
            limit: query.limit,
            document_ids: query.document_id.map(|id| vec![id]),
        };

        let mut builder = self.client.post(format!("{}/query", base)).json(&body);
        if !query.credential.is_empty() {
            builder = builder.bearer_auth(query.credential);
        }

        let response = builder
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

        let reply: QueryReply = serde_json::from_str(&text)
            .map_err(|e| ProviderError::decode(PROVIDER, e.to_string()))?;

        let raw_sources = match reply.sources {
            Some(serde_json::Value::Array(items)) => parse_raw_citations(&items),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(kind = ?other, "Ignoring non-array sources field");
                Vec::new()
            }
        };

        Ok(PrimaryAnswer {
            text: reply.response,
            raw_sources,
        })
    }
}

#[async_trait]
impl PrimaryBackend for PrimaryBackendClient {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    #[instrument(skip(self, query, cancel), fields(document_id = query.document_id, limit = query.limit))]
    async fn send(
        &self,
        query: &PrimaryQuery<'_>,
        cancel: &CancellationToken,
    ) -> Result<PrimaryAnswer, ProviderError> {
        let started = Instant::now();
        let result = with_deadline(PROVIDER, query.timeout, cancel, self.post_query(query)).await;
        let elapsed = started.elapsed().as_secs_f64();

        metrics::record_provider_call(PROVIDER.as_str(), elapsed, result.is_ok());
        match &result {
            Ok(answer) => info!(
                sources = answer.raw_sources.len(),
                duration_ms = (elapsed * 1000.0) as u64,
                "Primary backend answered"
            ),
            Err(e) => warn!(error = %e, "Primary backend call failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trialdoc_common::config::{CITATION_INSTRUCTION, FORMAT_INSTRUCTION};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer) -> PrimaryBackendClient {
        let config = PrimaryBackendConfig {
            base_url: Some(server.uri()),
            ..PrimaryBackendConfig::default()
        };
        PrimaryBackendClient::new(config, PromptsConfig::default()).unwrap()
    }

    fn query<'a>(timeout: Duration) -> PrimaryQuery<'a> {
        PrimaryQuery {
            message: "inclusion criteria",
            document_id: Some("doc1"),
            credential: "tok",
            user_id: "user-7",
            limit: 5,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_send_appends_citation_instruction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({"user_id": "user-7", "limit": 5, "document_ids": ["doc1"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Adults aged 18 and over.",
                "sources": [{"page": 3, "section": "Eligibility"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let answer = client
            .send(&query(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer.text, "Adults aged 18 and over.");
        assert_eq!(answer.raw_sources.len(), 1);
        assert_eq!(answer.raw_sources[0].page, Some(3));

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let message = sent["message"].as_str().unwrap();
        assert!(message.starts_with("inclusion criteria"));
        assert!(message.contains(CITATION_INSTRUCTION));
        assert!(message.ends_with(FORMAT_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .send(&query(Duration::from_millis(100)), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout { timeout_ms: 100, .. })));
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .send(&query(Duration::from_secs(5)), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ProviderError::Http { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_missing_base_url_fails_fast() {
        let client = PrimaryBackendClient::new(PrimaryBackendConfig::default(), PromptsConfig::default()).unwrap();
        assert!(!client.is_configured());

        let result = client
            .send(&query(Duration::from_secs(5)), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Configuration { .. })));
        assert!(!client.health_check().await);
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(client_for(&server).health_check().await);
    }

    #[tokio::test]
    async fn test_fetch_highlighted_pdf() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query/highlighted-pdf"))
            .and(query_param("doc", "https://files.example.org/abc.pdf"))
            .and(query_param("page", "4"))
            .and(query_param("searchText", "ECOG 0-1"))
            .and(query_param("bboxes", "[[1.0,2.0,3.0,4.0]]"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let request = HighlightRequest {
            page: 4,
            search_text: "ECOG 0-1".to_string(),
            bounding_boxes: Some(vec![[1.0, 2.0, 3.0, 4.0]]),
            source_name: None,
        };

        let bytes = client_for(&server)
            .fetch_highlighted_pdf("tok", "https://files.example.org/abc.pdf", &request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
    }
}
