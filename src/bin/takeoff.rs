//! CLI binary for edgequake-takeoff.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TakeoffConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_takeoff::{
    run_presplit, run_with, Collaborators, ProgressCallback, RunOutput, TakeoffConfig,
    TakeoffProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order, so start times are tracked per page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Splitting drawing set…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page: u32) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TakeoffProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page: u32, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page, Instant::now());
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: u32, _total: usize, parsed: bool) {
        let secs = self.elapsed_secs(page);
        let (mark, label) = if parsed {
            (green("✓"), dim("json"))
        } else {
            (yellow("~"), yellow("raw text"))
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {:<10}  {}",
            mark,
            page,
            label,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: u32, _total: usize, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} pages processed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages processed  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Takeoff with defaults (cover sheet skipped, results in ./output)
  takeoff drawings.pdf

  # Keep the first page and write somewhere else
  takeoff --keep-first-page --output-dir runs/level2 drawings.pdf

  # Limit parallelism and retry harder against a flaky partition service
  takeoff --concurrency 4 --max-attempts 5 drawings.pdf

  # Re-run extraction on pages split by an earlier run
  takeoff --split-dir output/split_pdf

  # Print the combined JSON to stdout as well
  takeoff --stdout --no-progress drawings.pdf | jq '."2".plumbing_items'

OUTPUT LAYOUT (under --output-dir):
  split_pdf/page_<N>.pdf      one PDF per page
  page_imgs/page_<N>.png      rendered page sent to the model
  combined_results.json       {"<N>": <line items> | {"error": ...}}

ENVIRONMENT VARIABLES:
  UNSTRUCTURED_API_KEY    Partitioning service API key (required)
  TAKEOFF_PARTITION_URL   Partitioning endpoint override
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Log filter, e.g. edgequake_takeoff=debug
"#;

/// Extract plumbing line items from drawing sets using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "takeoff",
    version,
    about = "Extract plumbing line items from construction drawing PDFs",
    long_about = "Split a drawing set into pages, extract layout text and a 300 DPI image per \
page, and ask a vision model for structured plumbing line items. Pages run in parallel; a \
failed page is recorded and never stops the others.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Drawing set PDF.
    #[arg(required_unless_present = "split_dir")]
    input: Option<PathBuf>,

    /// Process page_<N>.pdf files from an earlier split instead of an input PDF.
    #[arg(long, conflicts_with = "input")]
    split_dir: Option<PathBuf>,

    /// Directory for split pages, page images and combined_results.json.
    #[arg(short, long, env = "TAKEOFF_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Process the first page too (skipped by default as a cover sheet).
    #[arg(long, env = "TAKEOFF_KEEP_FIRST_PAGE")]
    keep_first_page: bool,

    /// Rendering DPI (72–600).
    #[arg(long, env = "TAKEOFF_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Partitioning service endpoint.
    #[arg(long, env = "TAKEOFF_PARTITION_URL")]
    partition_api_url: Option<String>,

    /// Partitioning service API key.
    #[arg(long, env = "UNSTRUCTURED_API_KEY", hide_env_values = true)]
    partition_api_key: Option<String>,

    /// Partitioning attempts per page, including the first.
    #[arg(long, env = "TAKEOFF_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Backoff base in milliseconds (doubles per retry).
    #[arg(long, env = "TAKEOFF_RETRY_BASE_DELAY_MS", default_value_t = 1000)]
    retry_base_delay_ms: u64,

    /// Per-attempt partitioning timeout in seconds.
    #[arg(long, env = "TAKEOFF_ATTEMPT_TIMEOUT", default_value_t = 600)]
    attempt_timeout: u64,

    /// Maximum pages in flight (default: all at once).
    #[arg(short, long, env = "TAKEOFF_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "TAKEOFF_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "TAKEOFF_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "TAKEOFF_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Also print the combined JSON to stdout.
    #[arg(long)]
    stdout: bool,

    /// Disable progress bar.
    #[arg(long, env = "TAKEOFF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TAKEOFF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TAKEOFF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn TakeoffProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let collaborators = Collaborators::from_config(&config)
        .await
        .context("Failed to set up services")?;

    let output = match (&cli.split_dir, &cli.input) {
        (Some(dir), _) => run_presplit(dir, &config, &collaborators).await,
        (None, Some(input)) => run_with(input, &config, &collaborators).await,
        (None, None) => anyhow::bail!("an input PDF or --split-dir is required"),
    }
    .context("Takeoff failed")?;

    if cli.stdout {
        let json = output
            .results
            .to_json_pretty()
            .context("Failed to serialise results")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        print_summary(&output);
    }

    Ok(())
}

fn print_summary(output: &RunOutput) {
    let stats = &output.stats;
    let mark = if stats.failed_pages == 0 && stats.unparsed_pages == 0 {
        green("✔")
    } else {
        cyan("⚠")
    };
    let target = output
        .results_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    eprintln!(
        "{}  {}/{} pages structured  {}ms  →  {}",
        mark,
        stats.structured_pages,
        stats.submitted_pages,
        stats.total_duration_ms,
        bold(&target),
    );
    if stats.unparsed_pages > 0 || stats.failed_pages > 0 {
        eprintln!(
            "   {} raw-text pages  /  {} failed pages",
            dim(&stats.unparsed_pages.to_string()),
            dim(&stats.failed_pages.to_string()),
        );
    }
}

/// Map CLI args to `TakeoffConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TakeoffConfig> {
    let mut builder = TakeoffConfig::builder()
        .output_dir(&cli.output_dir)
        .skip_first_page(!cli.keep_first_page)
        .dpi(cli.dpi)
        .max_attempts(cli.max_attempts)
        .retry_base_delay_ms(cli.retry_base_delay_ms)
        .attempt_timeout_secs(cli.attempt_timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref url) = cli.partition_api_url {
        builder = builder.partition_api_url(url);
    }
    if let Some(ref key) = cli.partition_api_key {
        builder = builder.partition_api_key(key);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.max_concurrent_pages(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
