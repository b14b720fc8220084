//! Reading-order reconstruction and noise suppression for partitioned text.
//!
//! The partitioning service returns text elements with a bounding box but no
//! meaningful sequence. This module puts them back into top-left reading
//! order and strips the debris that layout analysis leaves on drawing sheets:
//! vertical title-block lettering comes back as long runs of one- and
//! two-character lines, which say nothing to the model and crowd out the
//! callouts that matter.
//!
//! ## Steps
//!
//! 1. Drop fragments with no text or no coordinates
//! 2. Stable sort by `(round(y, 2), round(x, 2))`
//! 3. Join with `\n`
//! 4. Decode backslash escapes, then HTML entities
//! 5. Drop runs of ≥ [`NOISE_RUN_THRESHOLD`] short lines
//! 6. Collapse repeated newlines/spaces and trim
//!
//! Step 5 is a tuned heuristic, not a transform with a correctness
//! guarantee: a numbered list of five single-digit lines is dropped too.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Lines at most this many characters long are candidates for noise.
pub const SHORT_LINE_MAX_CHARS: usize = 2;

/// A buffered run of short lines this long is discarded.
pub const NOISE_RUN_THRESHOLD: usize = 5;

/// Sort rank for fragments without coordinates.
const MISSING_COORD_RANK: f64 = 9999.0;

/// One piece of text anchored at the top-left corner of its bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedFragment {
    pub text: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl PositionedFragment {
    pub fn new(text: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            text: text.into(),
            x: Some(x),
            y: Some(y),
        }
    }

    /// A fragment the service returned without a bounding box.
    pub fn unplaced(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            x: None,
            y: None,
        }
    }

    fn has_coordinates(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }

    fn sort_key(&self) -> (f64, f64) {
        match (self.x, self.y) {
            (Some(x), Some(y)) => (round2(y), round2(x)),
            _ => (MISSING_COORD_RANK, MISSING_COORD_RANK),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Clean a page's fragments into one text block for the model prompt.
pub fn clean_fragments(fragments: &[PositionedFragment]) -> String {
    let ordered = reading_order(fragments);
    let merged = ordered
        .iter()
        .map(|f| f.text.trim())
        .collect::<Vec<_>>()
        .join("\n");
    clean_text(&merged)
}

/// Usable fragments in top-to-bottom, left-to-right order.
///
/// The sort is stable, so fragments sharing a rounded position keep the
/// order the service returned them in.
pub fn reading_order(fragments: &[PositionedFragment]) -> Vec<&PositionedFragment> {
    let mut kept: Vec<&PositionedFragment> = fragments
        .iter()
        .filter(|f| !f.text.is_empty() && f.has_coordinates())
        .collect();
    kept.sort_by(|a, b| compare_keys(a.sort_key(), b.sort_key()));
    kept
}

fn compare_keys(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
}

/// Normalise and de-noise merged text (steps 4–6).
pub fn clean_text(text: &str) -> String {
    let decoded = decode_escapes(text);
    let unescaped = html_escape::decode_html_entities(&decoded);
    let denoised = drop_short_line_runs(&unescaped);
    collapse_whitespace(&denoised)
}

// ── Step 4: escapes ──────────────────────────────────────────────────────────

static RE_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\u([dD][89abAB][0-9a-fA-F]{2})\\u([dD][c-fC-F][0-9a-fA-F]{2})|\\u([0-9a-fA-F]{4})|\\U([0-9a-fA-F]{8})|\\x([0-9a-fA-F]{2})|\\([ntr\\])",
    )
    .unwrap()
});

/// Decode `\uXXXX` (including surrogate pairs), `\UXXXXXXXX`, `\xNN` and the
/// simple escapes `\n \t \r \\`. Sequences that don't name a valid scalar
/// value are left untouched.
fn decode_escapes(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }
    RE_ESCAPE
        .replace_all(input, |caps: &Captures<'_>| {
            let decoded = if let (Some(hi), Some(lo)) = (caps.get(1), caps.get(2)) {
                let hi = u32::from_str_radix(hi.as_str(), 16).unwrap_or(0);
                let lo = u32::from_str_radix(lo.as_str(), 16).unwrap_or(0);
                char::from_u32(0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00))
            } else if let Some(hex) = caps.get(3).or(caps.get(4)).or(caps.get(5)) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                match &caps[6] {
                    "n" => Some('\n'),
                    "t" => Some('\t'),
                    "r" => Some('\r'),
                    _ => Some('\\'),
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

// ── Step 5: short-line runs ──────────────────────────────────────────────────

static RE_WORDY_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w{2}").unwrap());

fn is_short(line: &str) -> bool {
    line.chars().count() <= SHORT_LINE_MAX_CHARS && !RE_WORDY_START.is_match(line)
}

fn drop_short_line_runs(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for line in text.split('\n').map(str::trim) {
        if is_short(line) {
            pending.push(line);
            continue;
        }
        if pending.len() < NOISE_RUN_THRESHOLD {
            kept.append(&mut pending);
        } else {
            pending.clear();
        }
        kept.push(line);
    }
    if pending.len() < NOISE_RUN_THRESHOLD {
        kept.append(&mut pending);
    }

    kept.join("\n")
}

// ── Step 6: whitespace ───────────────────────────────────────────────────────

static RE_NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());
static RE_SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

fn collapse_whitespace(text: &str) -> String {
    let s = RE_NEWLINE_RUN.replace_all(text, "\n");
    let s = RE_SPACE_RUN.replace_all(&s, " ");
    s.trim().to_string()
}
