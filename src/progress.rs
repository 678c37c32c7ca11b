//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a run moves through its stages and resolves each illustration.
//!
//! # Example
//!
//! ```rust
//! use book_illustrator::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     resolved: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_image_resolved(&self, index: usize, total: usize) {
//!         self.resolved.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("illustration {}/{} ready", index + 1, total);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { resolved: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::{ResolutionSummary, RunStage};
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: with `image_concurrency > 1` the
/// per-image methods are called from concurrently running tasks. All methods
/// default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called on every stage transition, including `Failed`.
    fn on_stage(&self, stage: RunStage) {
        let _ = stage;
    }

    /// Called once the number of illustration placeholders is known.
    fn on_images_start(&self, total: usize) {
        let _ = total;
    }

    /// An illustration placeholder received an image.
    ///
    /// `index` is the 0-based position among the image prompts, not the
    /// block index.
    fn on_image_resolved(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Every candidate failed for a placeholder; it will be left out of the book.
    fn on_image_unresolved(&self, index: usize, total: usize, reason: &str) {
        let _ = (index, total, reason);
    }

    /// Called once after the PDF has been persisted.
    fn on_run_complete(&self, summary: ResolutionSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<RunStage>>,
        resolved: AtomicUsize,
        unresolved: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage(&self, stage: RunStage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_image_resolved(&self, _index: usize, _total: usize) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_unresolved(&self, _index: usize, _total: usize, _reason: &str) {
            self.unresolved.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage(RunStage::Structuring);
        cb.on_images_start(3);
        cb.on_image_resolved(0, 3);
        cb.on_image_unresolved(1, 3, "no image");
        cb.on_run_complete(ResolutionSummary::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage(RunStage::Structuring);
        tracker.on_stage(RunStage::ImageResolving);
        tracker.on_image_resolved(0, 2);
        tracker.on_image_unresolved(1, 2, "all candidates failed");

        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![RunStage::Structuring, RunStage::ImageResolving]
        );
        assert_eq!(tracker.resolved.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.unresolved.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage(RunStage::Delivered);
    }
}
