//! # edgequake-takeoff
//!
//! Extract plumbing line items from construction drawing sets using layout
//! extraction and Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! A drawing sheet is half picture, half text. Text extraction alone loses
//! which callout belongs to which fixture; an image alone loses small print.
//! This crate sends both to a vision model, page by page and in parallel, and
//! collects the answers into one JSON document keyed by page number.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Split      one PDF per page (pdfium), cover sheet skipped by default
//!  ├─ 2. Partition  remote layout extraction per page, retried with backoff
//!  ├─ 3. Clean      reading order from coordinates, noise removal
//!  ├─ 4. Render     page → PNG at 300 DPI (CPU-bound, spawn_blocking)
//!  ├─ 5. VLM        text + image → JSON line items
//!  └─ 6. Output     combined_results.json, one entry per page
//! ```
//!
//! Steps 2–5 run concurrently across pages. A page that fails gets an error
//! record; it never aborts the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_takeoff::{run, TakeoffConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM provider auto-detected from OPENAI_API_KEY and friends
//!     let config = TakeoffConfig::builder()
//!         .partition_api_key(std::env::var("UNSTRUCTURED_API_KEY")?)
//!         .build()?;
//!     let output = run("drawings.pdf", &config).await?;
//!     for (page, payload) in output.results.iter() {
//!         println!("page {page}: {}", payload.to_value());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `takeoff` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-takeoff = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{TakeoffConfig, TakeoffConfigBuilder};
pub use error::{AttemptError, ExtractionError, PageError, TakeoffError};
pub use orchestrate::Orchestrator;
pub use output::{CombinedResult, PagePayload, PageResult, PageTask, RunOutput, RunStats};
pub use pipeline::partition::RetryPolicy;
pub use pipeline::text::PositionedFragment;
pub use progress::{NoopProgressCallback, ProgressCallback, TakeoffProgressCallback};
pub use run::{run, run_presplit, run_sync, run_with, write_results, Collaborators};
