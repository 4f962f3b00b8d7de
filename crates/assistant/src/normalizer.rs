//! Response normalization
//!
//! Pure functions mapping each provider's raw answer into `UnifiedResponse`.
//! Every optional raw field has a default:
//! - section: `"Document Section"`
//! - relevance: medium for primary/fallback references, high for citations
//!   the LLM reports itself
//! - context: a placeholder naming the provider
//! - highlight URL: `{documentUrl}#page={page}`
//!
//! Bounding boxes pass through only when non-empty. Entries with a missing or
//! negative page are dropped; an empty exact text becomes `"Page {n}"`.

use crate::providers::{ChatAnswer, DocumentChunk, LlmAnswer, PrimaryAnswer};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use trialdoc_common::{
    models::{dedupe_citations, sort_for_display, BoundingBox},
    CitationSource, DocumentInfo, ProviderKind, Relevance, UnifiedCitation, UnifiedResponse,
    DEFAULT_SECTION,
};

/// Provider-reported citation before defaults are applied
///
/// A field of the wrong type reads as absent so the entry keeps its page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawCitation {
    #[serde(alias = "page_number", alias = "pageNumber", deserialize_with = "lenient_page")]
    pub page: Option<i64>,

    #[serde(alias = "section_title", alias = "title", deserialize_with = "lenient_text")]
    pub section: Option<String>,

    #[serde(
        alias = "exact_text",
        alias = "text",
        alias = "quote",
        deserialize_with = "lenient_text"
    )]
    pub exact_text: Option<String>,

    #[serde(deserialize_with = "lenient_text")]
    pub relevance: Option<String>,

    #[serde(deserialize_with = "lenient_text")]
    pub context: Option<String>,

    #[serde(alias = "highlightURL", alias = "highlight_url", deserialize_with = "lenient_text")]
    pub highlight_url: Option<String>,

    #[serde(alias = "bounding_boxes", alias = "bboxes", deserialize_with = "lenient_boxes")]
    pub bounding_boxes: Option<Vec<BoundingBox>>,

    #[serde(alias = "source_name", alias = "document_name", deserialize_with = "lenient_text")]
    pub source_name: Option<String>,
}

impl RawCitation {
    pub fn at_page(page: i64) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }
}

/// Accept pages reported as integers, floats or numeric strings
fn lenient_page<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Strings pass through, scalars are stringified, anything else is absent
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Rectangles as `[x, y, w, h]` or `{x, y, w|width, h|height}`; unreadable ones are skipped
fn lenient_boxes<'de, D>(deserializer: D) -> Result<Option<Vec<BoundingBox>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(serde_json::Value::Array(items)) = value else {
        return Ok(None);
    };
    Ok(Some(items.iter().filter_map(bounding_box).collect()))
}

fn bounding_box(value: &serde_json::Value) -> Option<BoundingBox> {
    let coord = |v: Option<&serde_json::Value>| v.and_then(serde_json::Value::as_f64);
    match value {
        serde_json::Value::Array(parts) if parts.len() == 4 => Some([
            coord(parts.first())?,
            coord(parts.get(1))?,
            coord(parts.get(2))?,
            coord(parts.get(3))?,
        ]),
        serde_json::Value::Object(map) => Some([
            coord(map.get("x"))?,
            coord(map.get("y"))?,
            coord(map.get("w").or_else(|| map.get("width")))?,
            coord(map.get("h").or_else(|| map.get("height")))?,
        ]),
        _ => None,
    }
}

/// Parse a raw `sources` array entry by entry, skipping malformed entries
pub fn parse_raw_citations(values: &[serde_json::Value]) -> Vec<RawCitation> {
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<RawCitation>(value.clone()) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(error = %e, "Skipping malformed source entry");
                None
            }
        })
        .collect()
}

/// Apply defaults to one raw citation; `None` when it has no usable page
pub fn unify_citation(
    raw: &RawCitation,
    provider: ProviderKind,
    default_relevance: Relevance,
    document: Option<&DocumentInfo>,
) -> Option<UnifiedCitation> {
    let page = match raw.page {
        Some(page) if page >= 0 => u32::try_from(page).ok()?,
        Some(page) => {
            warn!(page, provider = %provider, "Dropping citation with negative page");
            return None;
        }
        None => {
            debug!(provider = %provider, "Dropping citation without a page");
            return None;
        }
    };

    let bounding_boxes = raw
        .bounding_boxes
        .as_ref()
        .filter(|boxes| !boxes.is_empty())
        .cloned();

    Some(UnifiedCitation {
        page,
        section: non_empty(raw.section.as_deref()).unwrap_or_else(|| DEFAULT_SECTION.to_string()),
        exact_text: non_empty(raw.exact_text.as_deref()).unwrap_or_else(|| page_label(page)),
        relevance: raw
            .relevance
            .as_deref()
            .and_then(Relevance::parse)
            .unwrap_or(default_relevance),
        context: non_empty(raw.context.as_deref()).unwrap_or_else(|| placeholder_context(provider)),
        highlight_url: non_empty(raw.highlight_url.as_deref())
            .unwrap_or_else(|| highlight_url(document, page)),
        bounding_boxes,
        source_name: non_empty(raw.source_name.as_deref())
            .or_else(|| document.map(|d| d.name.clone())),
    })
}

/// One coarse citation per referenced page
pub fn coarse_citations(
    page_references: &[i64],
    provider: ProviderKind,
    document: Option<&DocumentInfo>,
) -> Vec<UnifiedCitation> {
    let citations = page_references
        .iter()
        .filter_map(|&page| {
            let raw = RawCitation {
                page: Some(page),
                section: Some(page_label_i64(page)),
                exact_text: Some(format!("Content from page {}", page)),
                relevance: Some("medium".to_string()),
                ..RawCitation::default()
            };
            unify_citation(&raw, provider, Relevance::Medium, document)
        })
        .collect();
    dedupe_citations(citations)
}

/// Normalize a primary backend answer
pub fn normalize_primary(answer: &PrimaryAnswer, document: Option<&DocumentInfo>) -> UnifiedResponse {
    let citations = answer
        .raw_sources
        .iter()
        .filter_map(|raw| unify_citation(raw, ProviderKind::Primary, Relevance::Medium, document))
        .collect();

    UnifiedResponse {
        text: answer.text.clone(),
        citations: finalize(citations),
        provider_used: ProviderKind::Primary,
        timestamp: now_millis(),
        cost: None,
        model_name: None,
        citation_source: CitationSource::Provider,
        citations_degraded: false,
    }
}

/// Normalize a document-chat answer.
///
/// Extraction-assist citations replace the coarse page references and are
/// tagged as such; otherwise one coarse citation is synthesized per page.
pub fn normalize_document_chat(
    answer: &ChatAnswer,
    provider: ProviderKind,
    document: Option<&DocumentInfo>,
) -> UnifiedResponse {
    let (citations, citation_source) = match &answer.citations {
        Some(extracted) => (finalize(extracted.clone()), CitationSource::ExtractionAssist),
        None => (
            finalize(coarse_citations(&answer.page_references, provider, document)),
            CitationSource::PageReferences,
        ),
    };

    UnifiedResponse {
        text: answer.content.clone(),
        citations,
        provider_used: provider,
        timestamp: now_millis(),
        cost: None,
        model_name: None,
        citation_source,
        citations_degraded: answer.citations_degraded,
    }
}

/// Normalize an LLM answer whose citations point at chunk indices
pub fn normalize_llm(
    answer: &LlmAnswer,
    chunks: &[DocumentChunk],
    provider: ProviderKind,
    document: Option<&DocumentInfo>,
) -> UnifiedResponse {
    let citations = answer
        .citations
        .iter()
        .filter_map(|cited| {
            let Some(chunk) = chunks.iter().find(|c| c.index == cited.chunk_index) else {
                warn!(chunk_index = cited.chunk_index, "LLM cited an unknown chunk");
                return None;
            };
            let raw = RawCitation {
                page: Some(i64::from(chunk.page)),
                section: cited.section.clone().or_else(|| chunk.section.clone()),
                exact_text: Some(cited.exact_text.clone()),
                relevance: cited.relevance.clone(),
                context: Some(chunk.text.chars().take(300).collect()),
                ..RawCitation::default()
            };
            unify_citation(&raw, provider, Relevance::High, document)
        })
        .collect();

    UnifiedResponse {
        text: answer.text.clone(),
        citations: finalize(citations),
        provider_used: provider,
        timestamp: now_millis(),
        cost: Some(answer.cost),
        model_name: Some(answer.model.clone()),
        citation_source: CitationSource::Provider,
        citations_degraded: false,
    }
}

/// `{documentUrl}#page={page}`
pub fn highlight_url(document: Option<&DocumentInfo>, page: u32) -> String {
    let base = document.and_then(|d| d.url.as_deref()).unwrap_or_default();
    format!("{}#page={}", base, page)
}

fn finalize(citations: Vec<UnifiedCitation>) -> Vec<UnifiedCitation> {
    let mut citations = dedupe_citations(citations);
    sort_for_display(&mut citations);
    citations
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

fn page_label(page: u32) -> String {
    format!("Page {}", page)
}

fn page_label_i64(page: i64) -> String {
    format!("Page {}", page)
}

fn placeholder_context(provider: ProviderKind) -> String {
    format!("Referenced by the {}", provider.label())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
