//! Configuration types for a takeoff run.
//!
//! All run behaviour is controlled through [`TakeoffConfig`], built via its
//! [`TakeoffConfigBuilder`]. Credentials travel inside the config and are
//! handed to each component explicitly; nothing in the library reads API keys
//! from process-wide state except the provider auto-detection fallback in
//! [`crate::run`].

use crate::error::TakeoffError;
use crate::pipeline::partition::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default partitioning endpoint (Unstructured serverless API).
pub const DEFAULT_PARTITION_API_URL: &str = "https://api.unstructuredapp.io/general/v0/general";

/// Default vision model used for structured extraction.
pub const DEFAULT_MODEL: &str = "gpt-4.1-2025-04-14";

/// Configuration for a takeoff run.
///
/// Built via [`TakeoffConfig::builder()`] or using [`TakeoffConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_takeoff::TakeoffConfig;
///
/// let config = TakeoffConfig::builder()
///     .output_dir("output")
///     .partition_api_key("my-key")
///     .max_attempts(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct TakeoffConfig {
    /// Root directory for run artefacts. Default: `output`.
    ///
    /// Split pages land in `split_pdf/`, rendered pages in `page_imgs/` and
    /// the combined JSON in `combined_results.json`.
    pub output_dir: PathBuf,

    /// Skip the first page of the input (usually a cover sheet). Default: true.
    pub skip_first_page: bool,

    /// Rendering DPI for the page image sent to the VLM. Range: 72–600. Default: 300.
    ///
    /// Plumbing drawings carry tiny callouts (pipe sizes, BE heights) that are
    /// unreadable below ~200 DPI.
    pub dpi: u32,

    /// Partitioning service endpoint.
    pub partition_api_url: String,

    /// Credential for the partitioning service.
    pub partition_api_key: String,

    /// Maximum partitioning attempts per page, including the first. Default: 3.
    pub max_attempts: u32,

    /// Backoff base in milliseconds; doubles per retry (1 s → 2 s → 4 s). Default: 1000.
    pub retry_base_delay_ms: u64,

    /// Upper bound on one partitioning attempt in seconds. Default: 600.
    ///
    /// `hi_res` partitioning with table inference is slow on dense sheets;
    /// ten minutes is what large mechanical drawings need in practice.
    pub attempt_timeout_secs: u64,

    /// Page files above this size log an advisory before upload. Default: 5 MB.
    pub large_file_threshold_bytes: u64,

    /// LLM model identifier. Default: [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "azure").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the LLM completion. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 8192.
    ///
    /// Busy riser diagrams can list well over a hundred items; a truncated
    /// response is invalid JSON and costs the whole page.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in plumbing prompt.
    pub system_prompt: Option<String>,

    /// Cap on pages in flight. Default: None (every page dispatched at once).
    pub max_concurrent_pages: Option<usize>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TakeoffConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            skip_first_page: true,
            dpi: 300,
            partition_api_url: DEFAULT_PARTITION_API_URL.to_string(),
            partition_api_key: String::new(),
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            attempt_timeout_secs: 600,
            large_file_threshold_bytes: 5 * 1024 * 1024,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            system_prompt: None,
            max_concurrent_pages: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TakeoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakeoffConfig")
            .field("output_dir", &self.output_dir)
            .field("skip_first_page", &self.skip_first_page)
            .field("dpi", &self.dpi)
            .field("partition_api_url", &self.partition_api_url)
            .field(
                "partition_api_key",
                &if self.partition_api_key.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_concurrent_pages", &self.max_concurrent_pages)
            .finish()
    }
}

impl TakeoffConfig {
    /// Create a new builder for `TakeoffConfig`.
    pub fn builder() -> TakeoffConfigBuilder {
        TakeoffConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory the split `page_<N>.pdf` files are written to.
    pub fn split_dir(&self) -> PathBuf {
        self.output_dir.join("split_pdf")
    }

    /// Directory the rendered `page_<N>.png` files are written to.
    pub fn image_dir(&self) -> PathBuf {
        self.output_dir.join("page_imgs")
    }

    /// Path of the combined JSON artefact.
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("combined_results.json")
    }

    /// The retry policy for the partitioning client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    /// Model to request from the provider.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`TakeoffConfig`].
pub struct TakeoffConfigBuilder {
    config: TakeoffConfig,
}

impl fmt::Debug for TakeoffConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TakeoffConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl TakeoffConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn skip_first_page(mut self, v: bool) -> Self {
        self.config.skip_first_page = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn partition_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.partition_api_url = url.into();
        self
    }

    pub fn partition_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.partition_api_key = key.into();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn attempt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.attempt_timeout_secs = secs;
        self
    }

    pub fn large_file_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.large_file_threshold_bytes = bytes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_concurrent_pages(mut self, n: usize) -> Self {
        self.config.max_concurrent_pages = Some(n);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TakeoffConfig, TakeoffError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(TakeoffError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.attempt_timeout_secs == 0 {
            return Err(TakeoffError::InvalidConfig(
                "attempt_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_concurrent_pages == Some(0) {
            return Err(TakeoffError::InvalidConfig(
                "max_concurrent_pages must be ≥ 1".into(),
            ));
        }
        if c.partition_api_url.trim().is_empty() {
            return Err(TakeoffError::InvalidConfig(
                "partition_api_url must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = TakeoffConfig::default();
        assert_eq!(c.dpi, 300);
        assert!(c.skip_first_page);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.attempt_timeout_secs, 600);
        assert_eq!(c.large_file_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
        assert!(c.max_concurrent_pages.is_none());
    }

    #[test]
    fn output_layout() {
        let c = TakeoffConfig::builder().output_dir("/tmp/run").build().unwrap();
        assert_eq!(c.split_dir(), PathBuf::from("/tmp/run/split_pdf"));
        assert_eq!(c.image_dir(), PathBuf::from("/tmp/run/page_imgs"));
        assert_eq!(
            c.results_path(),
            PathBuf::from("/tmp/run/combined_results.json")
        );
    }

    #[test]
    fn retry_policy_from_config() {
        let c = TakeoffConfig::builder()
            .max_attempts(4)
            .retry_base_delay_ms(250)
            .attempt_timeout_secs(30)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_attempts, 4);
        assert_eq!(p.base_delay, Duration::from_millis(250));
        assert_eq!(p.attempt_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = TakeoffConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        assert!(TakeoffConfig::builder()
            .max_concurrent_pages(0)
            .build()
            .is_err());
    }

    #[test]
    fn dpi_is_clamped() {
        let c = TakeoffConfig::builder().dpi(2000).build().unwrap();
        assert_eq!(c.dpi, 600);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = TakeoffConfig::builder()
            .partition_api_key("super-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
