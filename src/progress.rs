//! Progress-callback trait for per-page takeoff events.
//!
//! Inject an [`Arc<dyn TakeoffProgressCallback>`] via
//! [`crate::config::TakeoffConfigBuilder::progress_callback`] to receive
//! events as the orchestrator processes each page. Callbacks are observers
//! only: nothing they do changes the [`crate::output::CombinedResult`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_takeoff::{TakeoffConfig, TakeoffProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Failures(AtomicUsize);
//!
//! impl TakeoffProgressCallback for Failures {
//!     fn on_page_error(&self, page: u32, _total: usize, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page} failed: {error}");
//!     }
//! }
//!
//! let config = TakeoffConfig::builder()
//!     .progress_callback(Arc::new(Failures(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// Pages run concurrently on separate Tokio tasks, so `on_page_*` methods may
/// be called from several threads at once. All methods default to no-ops.
pub trait TakeoffProgressCallback: Send + Sync {
    /// Called once before any page is dispatched.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page task starts running.
    fn on_page_start(&self, page: u32, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page produced a payload.
    ///
    /// `parsed` is false when the model answered with text that was not JSON
    /// (the page is still recorded, with its raw response).
    fn on_page_complete(&self, page: u32, total_pages: usize, parsed: bool) {
        let _ = (page, total_pages, parsed);
    }

    /// Called when a page failed; the page gets an error record.
    fn on_page_error(&self, page: u32, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after every page reached a terminal state.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TakeoffProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TakeoffConfig`].
pub type ProgressCallback = Arc<dyn TakeoffProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        unparsed: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl TakeoffProgressCallback for Tracking {
        fn on_page_start(&self, _page: u32, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page: u32, _total: usize, parsed: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if !parsed {
                self.unparsed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_page_error(&self, _page: u32, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, success_count: usize) {
            self.succeeded.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3);
        cb.on_page_start(2, 3);
        cb.on_page_complete(2, 3, true);
        cb.on_page_error(3, 3, "boom");
        cb.on_run_complete(3, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = Tracking::default();
        t.on_page_start(1, 2);
        t.on_page_complete(1, 2, false);
        t.on_page_start(2, 2);
        t.on_page_error(2, 2, "HTTP 503");
        t.on_run_complete(2, 1);

        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.unparsed.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn TakeoffProgressCallback>();
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(1);
    }
}
