//! Error types for the edgequake-takeoff library.
//!
//! Two distinct error families reflect two distinct failure modes:
//!
//! * [`TakeoffError`]: **Fatal**: the run cannot proceed at all (bad input
//!   file, output directory cannot be created, provider not configured).
//!   Returned as `Err(TakeoffError)` from the top-level `run*` functions.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (partitioning
//!   service down, rasteriser produced nothing, LLM call rejected) but every
//!   other page is unaffected. The orchestrator turns it into an error record
//!   for that page only, so one bad drawing never costs the whole takeoff.
//!
//! [`ExtractionError`] and [`AttemptError`] describe the partitioning
//! service call in more detail and surface through [`PageError::Extraction`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-takeoff library.
///
/// Page-level failures use [`PageError`] and are recorded in the
/// [`crate::output::CombinedResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum TakeoffError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; encrypted drawing sets are not supported.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// Splitting produced no pages to process.
    #[error("PDF '{path}' has no pages to process (document has {total} pages, skip_first_page={skipped_first})")]
    NoPages {
        path: PathBuf,
        total: usize,
        skipped_first: bool,
    },

    /// A single page could not be written out while splitting.
    #[error("Failed to split page {page} of '{path}': {detail}")]
    SplitFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// No credential for the partitioning service.
    #[error("No API key for the partitioning service.\nSet UNSTRUCTURED_API_KEY or pass --partition-api-key.")]
    MissingPartitionKey,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create one of the run's output directories.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not serialise or write the combined results file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform and make it discoverable, e.g.\n\
  • set PDFIUM_LIB_PATH to the library file,\n\
  • place libpdfium in the working directory, or\n\
  • add its directory to LD_LIBRARY_PATH / DYLD_LIBRARY_PATH.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single failed request to the partitioning service.
///
/// Every variant here is transient from the client's point of view and is
/// retried with backoff until the attempt budget runs out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    /// The attempt did not finish inside the per-attempt timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection refused, reset, DNS failure and friends.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-2xx status.
    #[error("service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },
}

/// Failure of the remote extraction step for one page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Every attempt failed; `last` is the final attempt's cause.
    #[error("partitioning failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptError },

    /// A 2xx response whose body is not an element list.
    #[error("partitioning response could not be decoded: {0}")]
    Decode(String),

    /// The page file could not be read for upload.
    #[error("failed to read page file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A non-fatal error for a single page.
///
/// The orchestrator stores `error.to_string()` in the page's error record and
/// keeps going with every other page.
#[derive(Debug, Error)]
pub enum PageError {
    /// Layout-aware text could not be obtained from the partitioning service.
    #[error("Page {page}: text extraction failed: {source}")]
    Extraction {
        page: u32,
        #[source]
        source: ExtractionError,
    },

    /// The rasteriser produced no image for the page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    Rasterization { page: u32, detail: String },

    /// The structured-extraction (LLM) call failed.
    #[error("Page {page}: structured extraction failed: {detail}")]
    Inference { page: u32, detail: String },

    /// Local file handling for the page failed (saving the PNG etc.).
    #[error("Page {page}: I/O error on '{path}': {source}")]
    Io {
        page: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PageError {
    /// The page this error belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::Extraction { page, .. }
            | PageError::Rasterization { page, .. }
            | PageError::Inference { page, .. }
            | PageError::Io { page, .. } => *page,
        }
    }
}
