//! Bounded-concurrency task runner: drain a batch with at most N calls in
//! flight, aggregating outcomes without letting one failure abort the rest.
//!
//! ## Concurrency model
//!
//! `stream::iter(..).buffer_unordered(n)` gives exactly the queue +
//! in-flight-set semantics this stage needs: not-yet-started tasks wait in
//! the stream, at most `n` futures are polled concurrently, and whenever one
//! settles the next is started in its place. All of it is cooperative
//! interleaving on the event loop — the bound limits outstanding external
//! calls, not CPU parallelism — so outcome aggregation below is plain
//! sequential mutation with no locking.
//!
//! Individual task failure is *data* here, not an error: every task yields
//! an [`ItemResult`] whether it succeeded or not, and the runner's job is to
//! drain the full list regardless of partial failure.

use crate::output::ItemResult;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

/// Aggregated outcome of one drained batch.
#[derive(Debug)]
pub struct BatchReport {
    /// Every task's result, in completion order.
    pub results: Vec<ItemResult>,
    /// Tasks that ended `Succeeded`.
    pub completed: usize,
    /// Tasks that ended `Failed`.
    pub failed: usize,
}

impl BatchReport {
    /// Fraction of tasks that succeeded; 1.0 for an empty batch (an empty
    /// batch carries no evidence of trouble).
    pub fn success_rate(&self) -> f64 {
        let total = self.results.len();
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }

    /// The failed results only.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// Execute `tasks` with at most `bound` in flight; runs to full drain.
///
/// Each task future is started exactly once. Results arrive in completion
/// order — callers that need input order sort afterwards.
pub async fn drain<Fut>(tasks: Vec<Fut>, bound: usize) -> BatchReport
where
    Fut: Future<Output = ItemResult>,
{
    let total = tasks.len();
    let results: Vec<ItemResult> = stream::iter(tasks)
        .buffer_unordered(bound.max(1))
        .collect()
        .await;

    let completed = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - completed;
    debug!(total, completed, failed, "batch drained");

    BatchReport {
        results,
        completed,
        failed,
    }
}
