//! Page-level fan-out.
//!
//! Every [`PageTask`] runs on its own Tokio task. `buffer_unordered` bounds
//! how many are in flight (all of them unless `max_concurrent_pages` is set),
//! and outcomes are keyed by page number, never by completion order.
//!
//! Per task: `Pending → Running → {Succeeded, Failed}`. A page that returns
//! an error, or whose task panics, becomes an error record for that page; the
//! other pages are unaffected and [`Orchestrator::run`] itself cannot fail.

use crate::output::{CombinedResult, PagePayload, PageResult, PageTask};
use crate::pipeline::page::PageProcessor;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Orchestrator {
    processor: Arc<PageProcessor>,
    max_concurrent_pages: Option<usize>,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    pub fn new(processor: Arc<PageProcessor>) -> Self {
        Self {
            processor,
            max_concurrent_pages: None,
            progress: None,
        }
    }

    /// Cap on pages in flight; `None` dispatches every page at once.
    pub fn with_max_concurrent_pages(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent_pages = limit;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Process every task and collect one outcome per distinct page number.
    pub async fn run(&self, tasks: Vec<PageTask>) -> CombinedResult {
        let tasks = dedup_by_page(tasks);
        let total = tasks.len();
        if let Some(ref cb) = self.progress {
            cb.on_run_start(total);
        }

        let limit = self.max_concurrent_pages.unwrap_or(total).max(1);
        let outcomes: Vec<PageResult> = stream::iter(tasks.into_iter().map(|task| {
            let processor = Arc::clone(&self.processor);
            let progress = self.progress.clone();
            async move { run_one(processor, task, total, progress).await }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;

        let combined: CombinedResult = outcomes.into_iter().collect();
        info!(
            "Processed {} pages: {} structured, {} unparsed, {} failed",
            combined.len(),
            combined.len() - combined.failed_count() - combined.unparsed_count(),
            combined.unparsed_count(),
            combined.failed_count()
        );
        if let Some(ref cb) = self.progress {
            cb.on_run_complete(total, combined.succeeded_count());
        }
        combined
    }
}

/// Spawn one page and turn whatever happens to it into a [`PageResult`].
async fn run_one(
    processor: Arc<PageProcessor>,
    task: PageTask,
    total: usize,
    progress: Option<ProgressCallback>,
) -> PageResult {
    let page = task.page_number;
    let task_progress = progress.clone();
    let handle = tokio::spawn(async move {
        if let Some(ref cb) = task_progress {
            cb.on_page_start(page, total);
        }
        processor.process(&task).await
    });

    let payload = match handle.await {
        Ok(Ok(result)) => {
            info!("Completed processing page {}", page);
            if let Some(ref cb) = progress {
                cb.on_page_complete(page, total, result.payload.is_structured());
            }
            result.payload
        }
        Ok(Err(e)) => {
            warn!("Error processing page {}: {}", page, e);
            let error = e.to_string();
            if let Some(ref cb) = progress {
                cb.on_page_error(page, total, &error);
            }
            PagePayload::Failed { error }
        }
        Err(join_err) => {
            let error = if join_err.is_panic() {
                format!("Page {page}: processing panicked")
            } else {
                format!("Page {page}: processing task was cancelled")
            };
            warn!("Error processing page {}: {}", page, error);
            if let Some(ref cb) = progress {
                cb.on_page_error(page, total, &error);
            }
            PagePayload::Failed { error }
        }
    };

    PageResult {
        page_number: page,
        payload,
    }
}

/// Keep the first task for each page number.
fn dedup_by_page(tasks: Vec<PageTask>) -> Vec<PageTask> {
    let mut seen = HashSet::with_capacity(tasks.len());
    tasks
        .into_iter()
        .filter(|t| {
            let fresh = seen.insert(t.page_number);
            if !fresh {
                warn!(
                    "Duplicate task for page {} ({}) ignored",
                    t.page_number,
                    t.source_path.display()
                );
            }
            fresh
        })
        .collect()
}
