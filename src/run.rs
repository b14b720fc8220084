//! Top-level entry points: validate, split, process, write.
//!
//! [`run`] wires the production collaborators (pdfium, the Unstructured API,
//! an `edgequake-llm` provider). [`run_with`] and [`run_presplit`] take the
//! collaborators explicitly, which is how tests and embedders substitute
//! their own.
//!
//! Only fatal problems surface as `Err`: a bad input file, unwritable output
//! directories, a missing credential. Page failures are recorded in the
//! returned [`CombinedResult`].

use crate::config::TakeoffConfig;
use crate::error::TakeoffError;
use crate::orchestrate::Orchestrator;
use crate::output::{CombinedResult, PageTask, RunOutput, RunStats};
use crate::pipeline::llm::{StructuredExtractor, VisionExtractor};
use crate::pipeline::page::PageProcessor;
use crate::pipeline::partition::{ExtractionClient, PartitionService, UnstructuredApi};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::split::{self, PdfSplitter, PdfiumSplitter};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The external systems a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub splitter: Arc<dyn PdfSplitter>,
    pub partition: Arc<dyn PartitionService>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub extractor: Arc<dyn StructuredExtractor>,
}

impl Collaborators {
    /// Production wiring from a config.
    ///
    /// Fails early when either credential is missing so that a run never
    /// produces a file full of identical authentication errors.
    pub async fn from_config(config: &TakeoffConfig) -> Result<Self, TakeoffError> {
        if config.partition_api_key.trim().is_empty() {
            return Err(TakeoffError::MissingPartitionKey);
        }
        let partition = UnstructuredApi::new(
            config.partition_api_url.as_str(),
            config.partition_api_key.as_str(),
            Duration::from_secs(config.attempt_timeout_secs),
        )
        .map_err(|e| TakeoffError::Internal(format!("HTTP client: {e}")))?;

        let provider = resolve_provider(config).await?;

        Ok(Self {
            splitter: Arc::new(PdfiumSplitter),
            partition: Arc::new(partition),
            rasterizer: Arc::new(PdfiumRasterizer),
            extractor: Arc::new(VisionExtractor::new(provider, config)),
        })
    }
}

/// Run a full takeoff on `input` and write `combined_results.json`.
///
/// # Errors
/// Returns `Err(TakeoffError)` only for fatal errors:
/// - input missing, unreadable, not a PDF, encrypted or corrupt
/// - no pages left after skipping the cover sheet
/// - output directories or the results file cannot be written
/// - a credential is missing
pub async fn run(
    input: impl AsRef<Path>,
    config: &TakeoffConfig,
) -> Result<RunOutput, TakeoffError> {
    let collaborators = Collaborators::from_config(config).await?;
    run_with(input, config, &collaborators).await
}

/// [`run`] with caller-supplied collaborators.
pub async fn run_with(
    input: impl AsRef<Path>,
    config: &TakeoffConfig,
    collaborators: &Collaborators,
) -> Result<RunOutput, TakeoffError> {
    let total_start = Instant::now();
    let pdf_path = split::validate_pdf(input.as_ref())?;
    info!("Starting takeoff: {}", pdf_path.display());

    create_dir(&config.output_dir).await?;
    create_dir(&config.split_dir()).await?;
    create_dir(&config.image_dir()).await?;

    let split_start = Instant::now();
    let splitter = Arc::clone(&collaborators.splitter);
    let split_dir = config.split_dir();
    let skip_first_page = config.skip_first_page;
    let tasks = tokio::task::spawn_blocking(move || {
        splitter.split(&pdf_path, &split_dir, skip_first_page)
    })
    .await
    .map_err(|e| TakeoffError::Internal(format!("split task panicked: {e}")))??;
    let split_duration_ms = split_start.elapsed().as_millis() as u64;
    info!(
        "Split into {} page files in {}ms",
        tasks.len(),
        split_duration_ms
    );

    let document_pages = tasks.len() + usize::from(skip_first_page);
    process_tasks(
        tasks,
        config,
        collaborators,
        document_pages,
        split_duration_ms,
        total_start,
    )
    .await
}

/// Process the `page_<N>.pdf` files already in `split_dir`, skipping the split.
///
/// Useful for re-running extraction after a partial failure without touching
/// the original drawing set.
pub async fn run_presplit(
    split_dir: impl AsRef<Path>,
    config: &TakeoffConfig,
    collaborators: &Collaborators,
) -> Result<RunOutput, TakeoffError> {
    let total_start = Instant::now();
    let tasks = split::discover_split_pages(split_dir.as_ref())?;
    info!(
        "Found {} page files in {}",
        tasks.len(),
        split_dir.as_ref().display()
    );

    create_dir(&config.output_dir).await?;
    create_dir(&config.image_dir()).await?;

    let document_pages = tasks.len();
    process_tasks(tasks, config, collaborators, document_pages, 0, total_start).await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    input: impl AsRef<Path>,
    config: &TakeoffConfig,
) -> Result<RunOutput, TakeoffError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TakeoffError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(input, config))
}

/// Write the combined results as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_results(path: &Path, results: &CombinedResult) -> Result<(), TakeoffError> {
    let json = results
        .to_json_pretty()
        .map_err(|e| TakeoffError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TakeoffError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| TakeoffError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| TakeoffError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    debug!("Wrote {}", path.display());
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn process_tasks(
    tasks: Vec<PageTask>,
    config: &TakeoffConfig,
    collaborators: &Collaborators,
    document_pages: usize,
    split_duration_ms: u64,
    total_start: Instant,
) -> Result<RunOutput, TakeoffError> {
    let submitted_pages = tasks.len();

    let extraction = ExtractionClient::new(
        Arc::clone(&collaborators.partition),
        config.retry_policy(),
    )
    .with_large_file_threshold(config.large_file_threshold_bytes);
    let processor = Arc::new(PageProcessor::new(
        extraction,
        Arc::clone(&collaborators.rasterizer),
        Arc::clone(&collaborators.extractor),
        config.image_dir(),
        config.dpi,
    ));
    let orchestrator = Orchestrator::new(processor)
        .with_max_concurrent_pages(config.max_concurrent_pages)
        .with_progress(config.progress_callback.clone());

    let processing_start = Instant::now();
    let results = orchestrator.run(tasks).await;
    let processing_duration_ms = processing_start.elapsed().as_millis() as u64;

    let results_path = config.results_path();
    write_results(&results_path, &results).await?;

    let unparsed_pages = results.unparsed_count();
    let failed_pages = results.failed_count();
    let stats = RunStats {
        document_pages,
        submitted_pages,
        structured_pages: results.len() - unparsed_pages - failed_pages,
        unparsed_pages,
        failed_pages,
        split_duration_ms,
        processing_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Takeoff complete: {}/{} pages structured, {}ms total → {}",
        stats.structured_pages,
        results.len(),
        stats.total_duration_ms,
        results_path.display()
    );

    Ok(RunOutput {
        results,
        stats,
        results_path: Some(results_path),
    })
}

async fn create_dir(path: &Path) -> Result<(), TakeoffError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| TakeoffError::OutputDirFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, TakeoffError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TakeoffError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
async fn resolve_provider(config: &TakeoffConfig) -> Result<Arc<dyn LLMProvider>, TakeoffError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TakeoffError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PagePayload, PageResult};

    #[tokio::test]
    async fn write_results_is_atomic_and_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("combined_results.json");
        let results: CombinedResult = vec![PageResult {
            page_number: 2,
            payload: PagePayload::Failed {
                error: "boom".into(),
            },
        }]
        .into_iter()
        .collect();

        write_results(&path, &results).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "{\n  \"2\": {\n    \"error\": \"boom\"\n  }\n}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_partition_key_is_fatal() {
        let config = TakeoffConfig::default();
        let err = Collaborators::from_config(&config).await.err().unwrap();
        assert!(matches!(err, TakeoffError::MissingPartitionKey), "got {err:?}");
    }
}
