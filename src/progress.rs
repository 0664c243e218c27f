//! Progress-callback trait for per-item and per-batch run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through the item list.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database
//! record, or a terminal progress bar — without the library knowing anything
//! about how the host application communicates. The trait is `Send + Sync`
//! because items within a batch complete on interleaved tasks.

use std::sync::Arc;

/// Called by the pipeline as it processes items and completes batches.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Item-level methods may be invoked from interleaved
/// tasks; guard shared mutable state accordingly.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after discovery, before the first batch starts.
    fn on_run_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before an item's first recognition attempt.
    fn on_item_start(&self, input: &std::path::Path) {
        let _ = input;
    }

    /// Called when an item's text artifact has been written.
    ///
    /// `text_len` is the byte length of the assembled text (useful for
    /// progress displays that track output volume).
    fn on_item_complete(&self, input: &std::path::Path, text_len: usize) {
        let _ = (input, text_len);
    }

    /// Called when an item fails permanently (retries exhausted).
    fn on_item_error(&self, input: &std::path::Path, error: &str) {
        let _ = (input, error);
    }

    /// Called after each batch drains, with the observed success rate and the
    /// parameters the rate controller selected for the *next* batch.
    fn on_batch_complete(
        &self,
        batch_number: usize,
        success_rate: f64,
        next_batch_size: usize,
        next_delay_ms: u64,
    ) {
        let _ = (batch_number, success_rate, next_batch_size, next_delay_ms);
    }

    /// Called once after the last batch, before the run summary is returned.
    fn on_run_complete(&self, total_items: usize, succeeded: usize) {
        let _ = (total_items, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
