//! Core data model shared by the provider clients, the orchestrator and the gateway
//!
//! Provides:
//! - Document identity (`DocumentInfo`) and the metadata store record shape
//! - The unified citation and response shapes every provider is normalized into
//! - Display ordering and duplicate suppression for citation lists
//! - The payload handed to the PDF render surface for highlighting

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// A highlight rectangle on a rendered page.
///
/// Either `[x, y, w, h]` or `[x0, y0, x1, y1]` depending on the reporting
/// provider; the render surface interprets it.
pub type BoundingBox = [f64; 4];

/// Identifies a document to be queried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    /// Stable internal key
    pub id: String,

    /// Display name
    pub name: String,

    /// Remote location, required by providers that register documents by URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl DocumentInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: None,
            file_size: None,
            mime_type: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Record shape supplied by the document metadata store
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentMetadata {
    pub document_name: Option<String>,
    pub document_url: Option<String>,
    pub file_url: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

impl DocumentMetadata {
    /// Convert a store record into a `DocumentInfo`, preferring `document_url`
    pub fn into_document(self, id: impl Into<String>) -> DocumentInfo {
        let id = id.into();
        DocumentInfo {
            name: self.document_name.unwrap_or_else(|| id.clone()),
            url: self.document_url.or(self.file_url),
            file_size: self.file_size,
            mime_type: self.mime_type,
            id,
        }
    }
}

/// Provider-side registration of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSourceHandle {
    pub document_id: String,
    pub source_id: String,
}

/// Relevance tier of a citation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    fn rank(self) -> u8 {
        match self {
            Relevance::High => 3,
            Relevance::Medium => 2,
            Relevance::Low => 1,
        }
    }

    /// Lenient parse of a provider-reported tier; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Relevance::High),
            "medium" => Some(Relevance::Medium),
            "low" => Some(Relevance::Low),
            _ => None,
        }
    }
}

impl PartialOrd for Relevance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relevance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Which backend produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Internal RAG query backend
    Primary,
    /// Third-party document-chat API
    Fallback,
    /// LLM citation service
    Llm,
    /// Canned answers used by demos and conformance fixtures
    LlmMock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::Fallback => "fallback",
            ProviderKind::Llm => "llm",
            ProviderKind::LlmMock => "llm-mock",
        }
    }

    /// Human-readable label used in placeholder text
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary query backend",
            ProviderKind::Fallback => "document chat provider",
            ProviderKind::Llm => "LLM citation service",
            ProviderKind::LlmMock => "mock LLM",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a response's citation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CitationSource {
    /// Reported by the provider that produced the answer text
    Provider,
    /// Synthesized from coarse page references
    PageReferences,
    /// Replaced by a secondary extraction-assist analysis
    ExtractionAssist,
}

/// A structured pointer from an answer back into the source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedCitation {
    pub page: u32,
    pub section: String,
    pub exact_text: String,
    pub relevance: Relevance,
    pub context: String,
    #[serde(rename = "highlightURL")]
    pub highlight_url: String,
    /// Omitted when no geometry is known; never an empty list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl UnifiedCitation {
    /// Payload for the PDF render surface
    pub fn highlight_request(&self) -> HighlightRequest {
        HighlightRequest {
            page: self.page,
            search_text: self.exact_text.clone(),
            bounding_boxes: self.bounding_boxes.clone(),
            source_name: self.source_name.clone(),
        }
    }

    fn dedupe_key(&self) -> (u32, String) {
        (self.page, self.exact_text.clone())
    }
}

/// Request to highlight a span on a rendered PDF page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRequest {
    pub page: u32,
    pub search_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

/// The single response shape handed to the UI, whichever provider answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResponse {
    pub text: String,
    pub citations: Vec<UnifiedCitation>,
    pub provider_used: ProviderKind,
    /// Epoch milliseconds at construction
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub citation_source: CitationSource,
    /// Set when fine-grained citation extraction failed and coarse
    /// page references were used instead
    #[serde(default)]
    pub citations_degraded: bool,
}

/// Sort citations for display: relevance descending, then page ascending.
///
/// The sort is stable so equal entries keep provider order.
pub fn sort_for_display(citations: &mut [UnifiedCitation]) {
    citations.sort_by(|a, b| b.relevance.cmp(&a.relevance).then(a.page.cmp(&b.page)));
}

/// Drop repeated `(page, exact_text)` pairs, keeping the first occurrence
pub fn dedupe_citations(citations: Vec<UnifiedCitation>) -> Vec<UnifiedCitation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.dedupe_key()))
        .collect()
}
