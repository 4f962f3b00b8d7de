//! Highlighted PDF proxy

use crate::AppState;
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use validator::Validate;

use trialdoc_common::{
    auth::BearerCredential,
    errors::{AppError, Result},
    models::{BoundingBox, HighlightRequest},
};

/// Query string of `GET /documents/highlighted-pdf`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HighlightParams {
    /// Document URL
    #[validate(length(min = 1, max = 2048))]
    pub doc: String,

    pub page: u32,

    #[validate(length(min = 1, max = 2000))]
    pub search_text: String,

    /// JSON array of rectangles
    #[serde(default)]
    pub bboxes: Option<String>,

    #[serde(default)]
    pub source_name: Option<String>,
}

impl HighlightParams {
    fn highlight_request(&self) -> Result<HighlightRequest> {
        let bounding_boxes = match self.bboxes.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let boxes: Vec<BoundingBox> = serde_json::from_str(raw).map_err(|e| AppError::InvalidFormat {
                    message: format!("bboxes must be a JSON array of [x, y, w, h] rectangles: {}", e),
                })?;
                Some(boxes).filter(|b| !b.is_empty())
            }
        };

        Ok(HighlightRequest {
            page: self.page,
            search_text: self.search_text.clone(),
            bounding_boxes,
            source_name: self.source_name.clone(),
        })
    }
}

/// Fetch a PDF with the cited passage highlighted by the primary backend
pub async fn highlighted_pdf(
    State(state): State<AppState>,
    credential: BearerCredential,
    Query(params): Query<HighlightParams>,
) -> Result<Response> {
    params.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;
    let request = params.highlight_request()?;

    let cancel = state.request_token();
    let bytes = state
        .primary
        .fetch_highlighted_pdf(&credential.token, &params.doc, &request, &cancel)
        .await
        .map_err(AppError::from)?;

    tracing::debug!(request_id = %credential.request_id, size = bytes.len(), "Highlighted PDF fetched");
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bboxes: Option<&str>) -> HighlightParams {
        HighlightParams {
            doc: "https://files.example.org/abc.pdf".to_string(),
            page: 4,
            search_text: "ECOG".to_string(),
            bboxes: bboxes.map(String::from),
            source_name: None,
        }
    }

    #[test]
    fn test_bboxes_parsing() {
        let request = params(Some("[[1, 2, 3, 4]]")).highlight_request().unwrap();
        assert_eq!(request.bounding_boxes, Some(vec![[1.0, 2.0, 3.0, 4.0]]));

        // Empty geometry is omitted
        assert!(params(Some("[]")).highlight_request().unwrap().bounding_boxes.is_none());
        assert!(params(None).highlight_request().unwrap().bounding_boxes.is_none());

        let err = params(Some("not json")).highlight_request().unwrap_err();
        assert!(matches!(err, AppError::InvalidFormat { .. }));
    }
}
