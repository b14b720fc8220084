//! Pipeline stages for a plumbing takeoff.
//!
//! Each submodule implements exactly one step. The network and pdfium steps
//! sit behind traits ([`split::PdfSplitter`], [`partition::PartitionService`],
//! [`render::Rasterizer`], [`llm::StructuredExtractor`]) so the page pipeline
//! can be exercised without either.
//!
//! ## Data Flow
//!
//! ```text
//! split ──▶ partition ──▶ text ──┐
//!   │                            ├──▶ llm ──▶ page (parse)
//!   └─────▶ render ──▶ encode ───┘
//! ```
//!
//! 1. [`split`]     : validate the input and write one PDF per page
//! 2. [`partition`] : remote layout extraction with retry/backoff; the only
//!    stage that retries
//! 3. [`text`]      : rebuild reading order and strip extraction noise
//! 4. [`render`]    : rasterise the page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 5. [`encode`]    : PNG bytes for disk, base64 `ImageData` for the request
//! 6. [`llm`]       : one vision-model call per page
//! 7. [`page`]      : run 2–6 for one page and interpret the answer

pub mod encode;
pub mod llm;
pub mod page;
pub mod partition;
pub mod render;
pub mod split;
pub mod text;
