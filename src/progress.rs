//! Progress-callback trait for per-attachment processing events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as [`crate::DocumentProcessor`] converts each attachment of a batch.
//!
//! # Example
//!
//! ```rust
//! use registratura::{PipelineConfig, ProcessingProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     converted: AtomicUsize,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_file_converted(&self, index: usize, total: usize, name: &str, pages: u32) {
//!         self.converted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ({} pages)", index, total, name, pages);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { converted: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the processor as it works through a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Indices are 1-based.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once before the first attachment is converted.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called before an attachment is converted.
    fn on_file_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an attachment converted to a PDF of `pages` pages.
    fn on_file_converted(&self, index: usize, total: usize, name: &str, pages: u32) {
        let _ = (index, total, name, pages);
    }

    /// Called when an attachment is left out of the batch.
    fn on_file_skipped(&self, index: usize, total: usize, name: &str, reason: &str) {
        let _ = (index, total, name, reason);
    }

    /// Called once after every attachment has been attempted.
    fn on_batch_complete(&self, converted: usize, skipped: usize) {
        let _ = (converted, skipped);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicUsize,
        converted: AtomicUsize,
        skipped: Mutex<Vec<String>>,
        completed: Mutex<Option<(usize, usize)>>,
    }

    impl ProcessingProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }

        fn on_file_converted(&self, _index: usize, _total: usize, _name: &str, _pages: u32) {
            self.converted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_skipped(&self, _index: usize, _total: usize, name: &str, _reason: &str) {
            self.skipped.lock().unwrap().push(name.to_string());
        }

        fn on_batch_complete(&self, converted: usize, skipped: usize) {
            *self.completed.lock().unwrap() = Some((converted, skipped));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_file_start(1, 2, "a.png");
        cb.on_file_converted(1, 2, "a.png", 1);
        cb.on_file_skipped(2, 2, "b.zip", "unsupported");
        cb.on_batch_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracking = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracking.clone();
        cb.on_batch_start(3);
        cb.on_file_start(1, 3, "a.png");
        cb.on_file_converted(1, 3, "a.png", 1);
        cb.on_file_skipped(2, 3, "b.zip", "unsupported");
        cb.on_file_converted(3, 3, "c.txt", 2);
        cb.on_batch_complete(2, 1);

        assert_eq!(tracking.total.load(Ordering::SeqCst), 3);
        assert_eq!(tracking.converted.load(Ordering::SeqCst), 2);
        assert_eq!(*tracking.skipped.lock().unwrap(), vec!["b.zip".to_string()]);
        assert_eq!(*tracking.completed.lock().unwrap(), Some((2, 1)));
    }

    #[test]
    fn tracking_counts() {
        let cb = TrackingCallback::default();
        cb.on_batch_start(2);
        cb.on_file_converted(1, 2, "a.png", 1);
        cb.on_file_skipped(2, 2, "b.zip", "unsupported");
        assert_eq!(cb.total.load(Ordering::SeqCst), 2);
        assert_eq!(cb.converted.load(Ordering::SeqCst), 1);
        assert_eq!(*cb.skipped.lock().unwrap(), vec!["b.zip".to_string()]);
    }
}
