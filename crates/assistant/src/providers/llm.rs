//! LLM citation service client
//!
//! Messages-style API (`POST {base}/v1/messages`). Two uses:
//! - answering a question from caller-supplied chunks, with citations
//!   anchored to chunk indices
//! - citation extraction for document-chat answers, reading the PDF by URL
//!
//! Every completion is priced from its token usage.

use super::{with_deadline, LlmAnswerer};
use crate::citation_assist::{self, CitationExtractor};
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use trialdoc_common::{
    config::{LlmConfig, FORMAT_INSTRUCTION},
    metrics, DocumentInfo, ProviderKind, UnifiedCitation,
};

const PROVIDER: ProviderKind = ProviderKind::Llm;

const CHUNK_ANSWER_BASE: &str = "You answer questions about clinical trial protocols using only the numbered excerpts provided. \
Respond with a single JSON object: {\"answer\": <markdown answer>, \"citations\": [{\"chunkIndex\": <excerpt number>, \
\"exactText\": <verbatim quote from that excerpt>, \"relevance\": \"high\" | \"medium\" | \"low\"}]}. \
If the excerpts do not contain the answer, say so in \"answer\" and return an empty citations list.";

/// Chunk-answer instructions plus the formatting contract for the `answer` field
static CHUNK_ANSWER_SYSTEM: LazyLock<String> =
    LazyLock::new(|| format!("{} Inside \"answer\": {}", CHUNK_ANSWER_BASE, FORMAT_INSTRUCTION));

const EXTRACTION_SYSTEM: &str = "You locate supporting passages in clinical trial protocol documents and reply with JSON only.";

/// Per-million-token prices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TokenRates {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            input_per_million: config.input_rate_per_million,
            output_per_million: config.output_rate_per_million,
        }
    }

    /// Dollar cost of one completion
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_million
            + usage.output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

impl Default for TokenRates {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Caller-supplied passage of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub index: usize,
    pub page: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Citation anchored to a chunk index
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCitation {
    #[serde(alias = "chunk_index", alias = "chunk")]
    pub chunk_index: usize,
    #[serde(alias = "exact_text", alias = "text", alias = "quote")]
    pub exact_text: String,
    #[serde(default)]
    pub relevance: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmAnswer {
    pub text: String,
    pub citations: Vec<ChunkCitation>,
    pub usage: TokenUsage,
    pub cost: f64,
    pub model: String,
}

// Wire types

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Document { source: DocumentSource },
}

#[derive(Serialize)]
struct DocumentSource {
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: TokenUsage,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChunkedReply {
    answer: String,
    #[serde(default)]
    citations: Vec<ChunkCitation>,
}

struct Completion {
    text: String,
    usage: TokenUsage,
    cost: f64,
    model: String,
}

/// HTTP client for the LLM citation service
#[derive(Clone)]
pub struct LlmCitationClient {
    client: reqwest::Client,
    config: LlmConfig,
    rates: TokenRates,
}

impl LlmCitationClient {
    pub fn new(config: LlmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::http_client(PROVIDER)?,
            rates: TokenRates::from_config(&config),
            config,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn complete(
        &self,
        system: &str,
        content: Vec<ContentBlock>,
        cancel: &CancellationToken,
    ) -> Result<Completion, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::configuration(PROVIDER, "API key is not set"))?;

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let timeout = self.timeout();
        let timeout_ms = timeout.as_millis() as u64;

        let call = async {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", &self.config.api_version)
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

            serde_json::from_str::<MessagesResponse>(&text)
                .map_err(|e| ProviderError::decode(PROVIDER, e.to_string()))
        };

        let started = Instant::now();
        let result = with_deadline(PROVIDER, timeout, cancel, call).await;
        metrics::record_provider_call(PROVIDER.as_str(), started.elapsed().as_secs_f64(), result.is_ok());

        let reply = result?;
        let text = reply
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let model = reply.model.unwrap_or_else(|| self.config.model.clone());
        let cost = self.rates.cost(&reply.usage);
        metrics::record_llm_cost(&model, cost);

        info!(
            model = %model,
            input_tokens = reply.usage.input_tokens,
            output_tokens = reply.usage.output_tokens,
            cost,
            "LLM completion"
        );

        Ok(Completion {
            text,
            usage: reply.usage,
            cost,
            model,
        })
    }
}

/// Numbered excerpt listing followed by the question
fn chunk_prompt(question: &str, chunks: &[DocumentChunk]) -> String {
    let mut prompt = String::from("Excerpts:\n");
    for chunk in chunks {
        match &chunk.section {
            Some(section) => prompt.push_str(&format!(
                "[{}] (page {}, {})\n{}\n\n",
                chunk.index, chunk.page, section, chunk.text
            )),
            None => prompt.push_str(&format!("[{}] (page {})\n{}\n\n", chunk.index, chunk.page, chunk.text)),
        }
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

#[async_trait]
impl LlmAnswerer for LlmCitationClient {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    #[instrument(skip(self, question, chunks, cancel), fields(chunks = chunks.len()))]
    async fn answer_from_chunks(
        &self,
        question: &str,
        chunks: &[DocumentChunk],
        cancel: &CancellationToken,
    ) -> Result<LlmAnswer, ProviderError> {
        let content = vec![ContentBlock::Text {
            text: chunk_prompt(question, chunks),
        }];
        let completion = self.complete(&CHUNK_ANSWER_SYSTEM, content, cancel).await?;

        let (text, citations) =
            match serde_json::from_str::<ChunkedReply>(citation_assist::extract_json(&completion.text)) {
                Ok(reply) => (reply.answer, reply.citations),
                Err(e) => {
                    warn!(error = %e, "LLM reply was not structured; returning it without citations");
                    (completion.text.clone(), Vec::new())
                }
            };

        Ok(LlmAnswer {
            text,
            citations,
            usage: completion.usage,
            cost: completion.cost,
            model: completion.model,
        })
    }
}

#[async_trait]
impl CitationExtractor for LlmCitationClient {
    #[instrument(skip_all, fields(document_id = %document.id))]
    async fn extract(
        &self,
        question: &str,
        answer: &str,
        document: &DocumentInfo,
        coarse_pages: &[i64],
        cancel: &CancellationToken,
    ) -> Result<Vec<UnifiedCitation>, ProviderError> {
        let url = document
            .url
            .clone()
            .ok_or_else(|| ProviderError::configuration(PROVIDER, "citation extraction needs a document URL"))?;

        let content = vec![
            ContentBlock::Document {
                source: DocumentSource { kind: "url", url },
            },
            ContentBlock::Text {
                text: citation_assist::build_extraction_prompt(question, answer, document, coarse_pages),
            },
        ];

        let completion = self.complete(EXTRACTION_SYSTEM, content, cancel).await?;
        citation_assist::parse_extracted_citations(&completion.text, document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmCitationClient {
        LlmCitationClient::new(LlmConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    fn reply(text: &str) -> serde_json::Value {
        json!({
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 1000, "output_tokens": 500}
        })
    }

    #[test]
    fn test_cost_computation() {
        let rates = TokenRates {
            input_per_million: 0.8,
            output_per_million: 4.0,
        };
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        assert!((rates.cost(&usage) - 0.0028).abs() < 1e-12);

        // Consumed tokens are never free
        let tiny = TokenUsage {
            input_tokens: 1,
            output_tokens: 0,
        };
        assert!(rates.cost(&tiny) > 0.0);
        assert_eq!(TokenRates::default(), rates);
    }

    #[test]
    fn test_chunk_prompt_numbers_excerpts() {
        let chunks = vec![DocumentChunk {
            index: 2,
            page: 11,
            text: "Washout of 28 days.".to_string(),
            section: Some("Exclusion".to_string()),
        }];
        let prompt = chunk_prompt("Washout period?", &chunks);
        assert!(prompt.contains("[2] (page 11, Exclusion)"));
        assert!(prompt.ends_with("Question: Washout period?"));
    }

    #[tokio::test]
    async fn test_answer_from_chunks() {
        let server = MockServer::start().await;
        let body = r#"```json
{"answer": "A **28-day** washout.", "citations": [{"chunkIndex": 2, "exactText": "Washout of 28 days.", "relevance": "high"}]}
```"#;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(body)))
            .expect(1)
            .mount(&server)
            .await;

        let chunks = vec![DocumentChunk {
            index: 2,
            page: 11,
            text: "Washout of 28 days.".to_string(),
            section: None,
        }];
        let answer = client_for(&server)
            .answer_from_chunks("Washout period?", &chunks, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer.text, "A **28-day** washout.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_index, 2);
        assert!((answer.cost - 0.0028).abs() < 1e-12);
        assert_eq!(answer.model, "claude-3-5-haiku-latest");

        // Same formatting contract as the other answer-producing providers
        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let system = sent["system"].as_str().unwrap();
        assert!(system.contains("chunkIndex"));
        assert!(system.contains(FORMAT_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_unstructured_reply_is_kept_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Plain prose answer.")))
            .mount(&server)
            .await;

        let answer = client_for(&server)
            .answer_from_chunks("q", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.text, "Plain prose answer.");
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_extract_requires_document_url() {
        let server = MockServer::start().await;
        let document = DocumentInfo::new("doc1", "Protocol");
        let result = client_for(&server)
            .extract("q", "a", &document, &[1], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = LlmCitationClient::new(LlmConfig::default()).unwrap();
        assert!(!client.is_configured());
        let result = client
            .answer_from_chunks("q", &[], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProviderError::Configuration { .. })));
    }
}
