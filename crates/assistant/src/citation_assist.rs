//! Citation extraction assist
//!
//! Secondary analysis that turns a document-chat answer plus its coarse page
//! references into precise citations. The result length is independent of the
//! number of coarse references. Failures propagate; the document-chat client
//! decides whether to degrade.

use crate::errors::ProviderError;
use crate::normalizer::{unify_citation, RawCitation};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use trialdoc_common::{DocumentInfo, ProviderKind, Relevance, UnifiedCitation};

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?i:json)?\s*(.*?)```").expect("fence pattern is valid"));

/// Produces precise citations for an answer
#[async_trait]
pub trait CitationExtractor: Send + Sync {
    async fn extract(
        &self,
        question: &str,
        answer: &str,
        document: &DocumentInfo,
        coarse_pages: &[i64],
        cancel: &CancellationToken,
    ) -> Result<Vec<UnifiedCitation>, ProviderError>;
}

/// Instruction sent alongside the document for citation extraction
pub fn build_extraction_prompt(
    question: &str,
    answer: &str,
    document: &DocumentInfo,
    coarse_pages: &[i64],
) -> String {
    let pages = if coarse_pages.is_empty() {
        "none".to_string()
    } else {
        coarse_pages
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "You are verifying citations for an answer about the clinical trial protocol \"{name}\".\n\n\
         Question: {question}\n\n\
         Answer:\n{answer}\n\n\
         Pages the answer was drawn from: {pages}\n\n\
         Find the passages in the attached document that support the answer. \
         The pages above are hints only; cite whatever passages actually support it. \
         Respond with a JSON array only, each element shaped as \
         {{\"page\": <page number>, \"section\": <section title>, \"exactText\": <verbatim quote>, \
         \"relevance\": \"high\" | \"medium\" | \"low\", \"context\": <one sentence on why it supports the answer>}}.",
        name = document.name,
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractionReply {
    List(Vec<serde_json::Value>),
    Wrapped { citations: Vec<serde_json::Value> },
}

/// Parse the model's reply into unified citations
pub fn parse_extracted_citations(
    reply: &str,
    document: &DocumentInfo,
) -> Result<Vec<UnifiedCitation>, ProviderError> {
    let parsed: ExtractionReply = serde_json::from_str(extract_json(reply))
        .map_err(|e| ProviderError::decode(ProviderKind::Llm, format!("citation list: {}", e)))?;

    let items = match parsed {
        ExtractionReply::List(items) | ExtractionReply::Wrapped { citations: items } => items,
    };

    Ok(crate::normalizer::parse_raw_citations(&items)
        .iter()
        .filter_map(|raw: &RawCitation| {
            unify_citation(raw, ProviderKind::Llm, Relevance::High, Some(document))
        })
        .collect())
}

/// Strip markdown fences and surrounding prose around a JSON payload
pub(crate) fn extract_json(text: &str) -> &str {
    if let Some(inner) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }

    let start = text.find(['[', '{']);
    let end = text.rfind([']', '}']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> DocumentInfo {
        DocumentInfo::new("doc1", "ABC-123 Protocol").with_url("https://files.example.org/abc.pdf")
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(extract_json("```JSON\n{\"citations\": []}\n```"), "{\"citations\": []}");
        assert_eq!(extract_json("Here you go: {\"a\": 1} hope it helps"), "{\"a\": 1}");
        assert_eq!(extract_json("  [] "), "[]");
    }

    #[test]
    fn test_prompt_mentions_pages_and_question() {
        let prompt = build_extraction_prompt("Who is eligible?", "Adults.", &protocol(), &[3, 4]);
        assert!(prompt.contains("Who is eligible?"));
        assert!(prompt.contains("3, 4"));
        assert!(prompt.contains("ABC-123 Protocol"));

        let prompt = build_extraction_prompt("q", "a", &protocol(), &[]);
        assert!(prompt.contains("drawn from: none"));
    }

    #[test]
    fn test_parse_reply_independent_of_coarse_count() {
        let reply = r#"```json
        [
          {"page": 3, "section": "Eligibility", "exactText": "Age >= 18", "relevance": "high"},
          {"page": 4, "exactText": "ECOG 0-1"},
          {"page": 9, "exactText": "Signed consent", "relevance": "low"}
        ]
        ```"#;

        let citations = parse_extracted_citations(reply, &protocol()).unwrap();
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[1].relevance, Relevance::High);
        assert_eq!(citations[1].section, trialdoc_common::DEFAULT_SECTION);
        assert_eq!(citations[2].highlight_url, "https://files.example.org/abc.pdf#page=9");
    }

    #[test]
    fn test_parse_wrapped_reply() {
        let reply = r#"{"citations": [{"page_number": 2, "text": "Primary endpoint"}]}"#;
        let citations = parse_extracted_citations(reply, &protocol()).unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].page, 2);
    }

    #[test]
    fn test_unparseable_reply_fails_loudly() {
        let result = parse_extracted_citations("I could not find anything.", &protocol());
        assert!(matches!(result, Err(ProviderError::Decode { .. })));
    }
}
