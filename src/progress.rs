//! Progress-callback trait for per-batch run events.
//!
//! Inject an [`Arc<dyn RewriteProgressCallback>`] via
//! [`crate::config::RewriteConfigBuilder::progress_callback`] to receive
//! events as the orchestrator seals, sends and commits each batch.
//!
//! Batch totals are estimates: the orchestrator only knows the input size,
//! not where batch boundaries will fall, so every event carries the current
//! estimate (`completed + ceil(remaining_bytes / batch_size)`), which
//! converges to the real count as the run proceeds.
//!
//! # Example
//!
//! ```rust
//! use edgequake_manuscript::{RewriteProgressCallback, RewriteConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl RewriteProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, sequence: u64, estimated_total: usize, output_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Batch {}/~{} done ({} bytes)", sequence, estimated_total, output_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = RewriteConfig::builder()
//!     .progress_callback(counter as Arc<dyn RewriteProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunSummary;
use std::sync::Arc;

/// Called by the orchestrator as it processes each batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive strictly in batch order from a single
/// task, but the trait is `Send + Sync` so implementations can be shared with
/// other threads (a UI, a progress bar ticker).
pub trait RewriteProgressCallback: Send + Sync {
    /// Called once before the first paragraph is pulled.
    fn on_run_start(&self, estimated_batches: usize) {
        let _ = estimated_batches;
    }

    /// Called just before a sealed batch is sent to the service.
    fn on_batch_start(&self, sequence: u64, estimated_total: usize) {
        let _ = (sequence, estimated_total);
    }

    /// Called after a batch's result was written into the output.
    ///
    /// `output_len` is the byte length of the service's answer.
    fn on_batch_complete(&self, sequence: u64, estimated_total: usize, output_len: usize) {
        let _ = (sequence, estimated_total, output_len);
    }

    /// Called when a batch is left unmodified (retries exhausted, segment
    /// mismatch) or halts the run (fatal answer).
    fn on_batch_error(&self, sequence: u64, estimated_total: usize, error: &str) {
        let _ = (sequence, estimated_total, error);
    }

    /// Called when the checkpoint could not be written after a batch.
    fn on_checkpoint_error(&self, sequence: u64, error: &str) {
        let _ = (sequence, error);
    }

    /// Called once when the run reaches a terminal state.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RewriteProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RewriteConfig`].
pub type ProgressCallback = Arc<dyn RewriteProgressCallback>;

/// Running estimate of how many batches the run will take.
#[derive(Debug, Clone)]
pub(crate) struct BatchEstimate {
    batch_size: usize,
    remaining_bytes: usize,
    completed: usize,
}

impl BatchEstimate {
    pub(crate) fn new(total_bytes: usize, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            remaining_bytes: total_bytes,
            completed: 0,
        }
    }

    /// Bytes have left the input and entered a sealed batch.
    pub(crate) fn consume(&mut self, bytes: usize) {
        self.remaining_bytes = self.remaining_bytes.saturating_sub(bytes);
    }

    pub(crate) fn complete_batch(&mut self) {
        self.completed += 1;
    }

    pub(crate) fn total(&self) -> usize {
        self.completed + self.remaining_bytes.div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RunStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        estimated: AtomicUsize,
    }

    impl RewriteProgressCallback for TrackingCallback {
        fn on_run_start(&self, estimated_batches: usize) {
            self.estimated.store(estimated_batches, Ordering::SeqCst);
        }

        fn on_batch_start(&self, _sequence: u64, _estimated_total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _sequence: u64, _estimated_total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_error(&self, _sequence: u64, _estimated_total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5);
        cb.on_batch_start(1, 5);
        cb.on_batch_complete(1, 5, 42);
        cb.on_batch_error(2, 5, "rate limited");
        cb.on_checkpoint_error(2, "disk full");
        cb.on_run_complete(&RunSummary {
            status: RunStatus::Completed,
            batches: 5,
            succeeded: 4,
            degraded: 1,
            fatal_reason: None,
        });
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            estimated: AtomicUsize::new(0),
        };

        tracker.on_run_start(3);
        tracker.on_batch_start(1, 3);
        tracker.on_batch_complete(1, 3, 100);
        tracker.on_batch_start(2, 3);
        tracker.on_batch_error(2, 3, "429");

        assert_eq!(tracker.estimated.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn estimate_refines_as_batches_complete() {
        let mut est = BatchEstimate::new(1200, 500);
        assert_eq!(est.total(), 3);

        est.consume(508);
        est.complete_batch();
        // 692 bytes left → 2 more
        assert_eq!(est.total(), 3);

        est.consume(692);
        est.complete_batch();
        assert_eq!(est.total(), 2);
    }

    #[test]
    fn estimate_of_empty_input_is_zero() {
        assert_eq!(BatchEstimate::new(0, 100).total(), 0);
    }
}
