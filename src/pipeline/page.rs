//! One page, end to end.
//!
//! ```text
//! page_<N>.pdf ──▶ partition ──▶ clean text ─┐
//!       │                                    ├──▶ vision model ──▶ parse JSON
//!       └──────▶ rasterise ──▶ page_<N>.png ─┘
//! ```
//!
//! Any failure before the model answers is returned as a [`PageError`] for
//! this page only. A model answer that is not JSON is kept verbatim as an
//! [`PagePayload::Unparsed`] record rather than treated as a failure.

use crate::error::PageError;
use crate::output::{PagePayload, PageResult, PageTask};
use crate::pipeline::encode;
use crate::pipeline::llm::StructuredExtractor;
use crate::pipeline::partition::ExtractionClient;
use crate::pipeline::render::Rasterizer;
use crate::pipeline::text;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Single outer ```` ```json ```` fence around the whole answer.
static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\n(.*?)\n?```$").unwrap());

/// Runs the per-page pipeline. Cheap to share across tasks behind an `Arc`.
pub struct PageProcessor {
    extraction: ExtractionClient,
    rasterizer: Arc<dyn Rasterizer>,
    extractor: Arc<dyn StructuredExtractor>,
    image_dir: PathBuf,
    dpi: u32,
}

impl PageProcessor {
    pub fn new(
        extraction: ExtractionClient,
        rasterizer: Arc<dyn Rasterizer>,
        extractor: Arc<dyn StructuredExtractor>,
        image_dir: impl Into<PathBuf>,
        dpi: u32,
    ) -> Self {
        Self {
            extraction,
            rasterizer,
            extractor,
            image_dir: image_dir.into(),
            dpi,
        }
    }

    /// Where the rendered image for `page_number` is saved.
    pub fn image_path(&self, page_number: u32) -> PathBuf {
        self.image_dir.join(format!("page_{page_number}.png"))
    }

    pub async fn process(&self, task: &PageTask) -> Result<PageResult, PageError> {
        let page = task.page_number;

        let extraction = self
            .extraction
            .extract(&task.source_path)
            .await
            .map_err(|source| PageError::Extraction { page, source })?;
        let context_text = text::clean_fragments(&extraction.fragments);
        debug!(
            "Page {}: {} elements → {} chars of context",
            page,
            extraction.elements.len(),
            context_text.len()
        );

        let image = self
            .rasterizer
            .render(&task.source_path, self.dpi)
            .await
            .map_err(|e| PageError::Rasterization {
                page,
                detail: e.to_string(),
            })?;

        let png = tokio::task::spawn_blocking(move || encode::png_bytes(&image))
            .await
            .map_err(|e| PageError::Rasterization {
                page,
                detail: format!("encoding task panicked: {e}"),
            })?
            .map_err(|e| PageError::Rasterization {
                page,
                detail: format!("PNG encoding failed: {e}"),
            })?;

        let image_path = self.image_path(page);
        tokio::fs::write(&image_path, &png)
            .await
            .map_err(|source| PageError::Io {
                page,
                path: image_path.clone(),
                source,
            })?;
        debug!("Page {}: saved {}", page, image_path.display());

        let response = self
            .extractor
            .infer(&png, &context_text, page)
            .await
            .map_err(|e| PageError::Inference {
                page,
                detail: e.to_string(),
            })?;

        Ok(PageResult {
            page_number: page,
            payload: parse_model_response(page, &response),
        })
    }
}

/// Interpret the model's answer.
///
/// A single outer code fence is removed before parsing. On failure the
/// original text, fence included, is kept in the record.
pub fn parse_model_response(page: u32, response: &str) -> PagePayload {
    let trimmed = response.trim();
    let candidate = RE_JSON_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => PagePayload::Structured(value),
        Err(e) => {
            warn!("Page {}: model response is not valid JSON: {}", page, e);
            PagePayload::Unparsed {
                raw_response: response.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_is_structured() {
        let p = parse_model_response(2, r#"{"page": 2, "plumbing_items": []}"#);
        assert_eq!(p, PagePayload::Structured(json!({"page": 2, "plumbing_items": []})));
    }

    #[test]
    fn fenced_json_is_structured() {
        let raw = "```json\n{\"page\": 3, \"plumbing_items\": [{\"item_type\": \"valve\"}]}\n```";
        match parse_model_response(3, raw) {
            PagePayload::Structured(v) => assert_eq!(v["plumbing_items"][0]["item_type"], "valve"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bare_fence_and_surrounding_whitespace() {
        let raw = "\n  ```\n[1, 2]\n```  \n";
        assert_eq!(parse_model_response(1, raw), PagePayload::Structured(json!([1, 2])));
    }

    #[test]
    fn invalid_json_keeps_raw_text() {
        let p = parse_model_response(5, "{not json");
        assert_eq!(
            p,
            PagePayload::Unparsed {
                raw_response: "{not json".into()
            }
        );
        assert_eq!(
            p.to_value(),
            json!({"error": "invalid JSON", "raw_response": "{not json"})
        );
    }

    #[test]
    fn prose_around_json_is_not_rescued() {
        let raw = "Here is the takeoff:\n```json\n{\"page\": 1}\n```";
        assert!(matches!(
            parse_model_response(1, raw),
            PagePayload::Unparsed { raw_response } if raw_response == raw
        ));
    }
}
