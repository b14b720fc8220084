//! Data model shared by the pipeline stages and the orchestrator.
//!
//! ```text
//! PageTask ──▶ PageProcessor ──▶ PageResult ──▶ CombinedResult ──▶ combined_results.json
//! ```
//!
//! [`CombinedResult`] serialises as a flat JSON object keyed by page number:
//!
//! ```json
//! {
//!   "2": { "page": 2, "plumbing_items": [ ... ] },
//!   "3": { "error": "invalid JSON", "raw_response": "Sure! Here ..." },
//!   "4": { "error": "Page 4: text extraction failed: ..." }
//! }
//! ```

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Marker stored in the `error` field when the model's answer was not JSON.
pub const INVALID_JSON_MARKER: &str = "invalid JSON";

/// One split page awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    /// 1-indexed page number in the original document.
    pub page_number: u32,
    /// Single-page PDF produced by the splitter.
    pub source_path: PathBuf,
}

impl PageTask {
    pub fn new(page_number: u32, source_path: impl Into<PathBuf>) -> Self {
        Self {
            page_number,
            source_path: source_path.into(),
        }
    }
}

/// The terminal outcome of one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PagePayload {
    /// The model answered with valid JSON.
    Structured(Value),
    /// The model answered, but not with JSON. The raw text is kept so a human
    /// can recover the line items later.
    Unparsed { raw_response: String },
    /// Processing failed; `error` is the stringified cause.
    Failed { error: String },
}

impl PagePayload {
    pub fn is_failed(&self) -> bool {
        matches!(self, PagePayload::Failed { .. })
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, PagePayload::Structured(_))
    }

    /// The JSON value written to the combined output for this page.
    pub fn to_value(&self) -> Value {
        match self {
            PagePayload::Structured(v) => v.clone(),
            PagePayload::Unparsed { raw_response } => serde_json::json!({
                "error": INVALID_JSON_MARKER,
                "raw_response": raw_response,
            }),
            PagePayload::Failed { error } => serde_json::json!({ "error": error }),
        }
    }
}

impl Serialize for PagePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PagePayload::Structured(v) => v.serialize(serializer),
            PagePayload::Unparsed { raw_response } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("error", INVALID_JSON_MARKER)?;
                map.serialize_entry("raw_response", raw_response)?;
                map.end()
            }
            PagePayload::Failed { error } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

/// Result of processing one [`PageTask`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page_number: u32,
    pub payload: PagePayload,
}

/// Page-number keyed outcomes of a whole run.
///
/// Built once by the orchestrator from the terminal outcome of every task and
/// read-only afterwards. Keys serialise as strings (`"1"`, `"2"`, …) and are
/// ordered numerically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CombinedResult {
    pages: BTreeMap<u32, PagePayload>,
}

impl CombinedResult {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, page_number: u32) -> Option<&PagePayload> {
        self.pages.get(&page_number)
    }

    /// Page numbers in ascending order.
    pub fn page_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &PagePayload)> {
        self.pages.iter().map(|(k, v)| (*k, v))
    }

    pub fn failed_count(&self) -> usize {
        self.pages.values().filter(|p| p.is_failed()).count()
    }

    pub fn unparsed_count(&self) -> usize {
        self.pages
            .values()
            .filter(|p| matches!(p, PagePayload::Unparsed { .. }))
            .count()
    }

    /// Pages that produced any payload (structured or raw text).
    pub fn succeeded_count(&self) -> usize {
        self.len() - self.failed_count()
    }

    /// Pretty-printed JSON document for the output artefact.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl FromIterator<PageResult> for CombinedResult {
    fn from_iter<I: IntoIterator<Item = PageResult>>(iter: I) -> Self {
        Self {
            pages: iter
                .into_iter()
                .map(|r| (r.page_number, r.payload))
                .collect(),
        }
    }
}

/// Summary statistics for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Pages in the input document.
    pub document_pages: usize,
    /// Pages submitted to the orchestrator.
    pub submitted_pages: usize,
    /// Pages whose model output parsed as JSON.
    pub structured_pages: usize,
    /// Pages whose model output was kept as raw text.
    pub unparsed_pages: usize,
    /// Pages with an error record.
    pub failed_pages: usize,
    pub split_duration_ms: u64,
    pub processing_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub results: CombinedResult,
    pub stats: RunStats,
    /// Where `combined_results.json` was written, if it was.
    pub results_path: Option<PathBuf>,
}
