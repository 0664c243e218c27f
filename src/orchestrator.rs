//! Batch orchestration: the run loop that ties discovery, the runner, the
//! retry policy, and the rate controller together.
//!
//! ## Batch boundaries as backpressure
//!
//! Batch *k+1* never starts until batch *k* has fully drained — every
//! started item has reached `Succeeded` or `Failed`. That boundary is
//! deliberate: it hands the rate controller a clean, complete success-rate
//! sample before it decides the next batch's size and delay. Within a batch,
//! items complete in any order.
//!
//! [`RateState`] is a plain value owned by this loop and threaded through
//! explicitly; the runner never sees it and nothing reads it concurrently.

use crate::config::OcrConfig;
use crate::error::{ItemError, OcrError};
use crate::output::{ErrorLog, ItemResult, ItemStatus, RunOutput, RunStats, WorkItem};
use crate::pipeline::rate::RateState;
use crate::pipeline::{assemble, discover, retry, runner};
use crate::recognize::Recognizer;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, warn};

/// Process every eligible image under `input_root`, writing one text
/// artifact per successful item under `output_root`.
///
/// This is the primary entry point for the library. Merging is a separate,
/// independent stage — see [`crate::pipeline::merge::merge_tree`].
///
/// # Returns
/// `Ok(RunOutput)` on success, even if some items failed (check
/// `output.stats.failed`).
///
/// # Errors
/// Returns `Err(OcrError)` only for fatal conditions: missing input root,
/// nothing to do, or every single item failing.
pub async fn run(
    input_root: &Path,
    output_root: &Path,
    recognizer: Arc<dyn Recognizer>,
    config: &OcrConfig,
) -> Result<RunOutput, OcrError> {
    let run_start = Instant::now();
    info!(
        input = %input_root.display(),
        output = %output_root.display(),
        "starting run"
    );

    // ── Step 1: Discover work items ──────────────────────────────────────
    let discovery = discover::discover(input_root, output_root, config)?;
    let total = discovery.items.len();
    let skipped = discovery.skipped.len();
    info!(items = total, skipped, "discovered work items");

    let error_log = config.error_log.clone().map(ErrorLog::new);
    if let Some(ref log) = error_log {
        for skip in &discovery.skipped {
            log.append(&skip.path, &skip.reason)?;
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    // ── Step 2: Drive batches under the rate controller ──────────────────
    let mut state = RateState::new(&config.rate);
    let mut queue: VecDeque<WorkItem> = discovery.items.into();
    let mut results: Vec<ItemResult> = Vec::with_capacity(total);
    let mut batch_number = 0usize;

    while !queue.is_empty() {
        batch_number += 1;
        let take = state.batch_size().min(queue.len());
        let batch: Vec<WorkItem> = queue.drain(..take).collect();

        let tasks: Vec<_> = batch
            .into_iter()
            .map(|item| {
                let recognizer = Arc::clone(&recognizer);
                async move { process_one(recognizer.as_ref(), item, config).await }
            })
            .collect();

        let report = runner::drain(tasks, config.concurrency).await;
        let success_rate = report.success_rate();

        if let Some(ref log) = error_log {
            for failure in report.failures() {
                if let Some(ref error) = failure.error {
                    log.append(&failure.item.input_path, &error.to_string())?;
                }
            }
        }
        results.extend(report.results);

        if config.adaptive {
            state.observe(success_rate, &config.rate);
        }
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_complete(
                batch_number,
                success_rate,
                state.batch_size(),
                state.batch_delay_ms(),
            );
        }
        info!(
            batch = batch_number,
            success_rate,
            next_batch_size = state.batch_size(),
            next_delay_ms = state.batch_delay_ms(),
            "batch complete"
        );

        if !queue.is_empty() {
            sleep(state.batch_delay()).await;
        }
    }

    // ── Step 3: Aggregate ────────────────────────────────────────────────
    results.sort_by(|a, b| a.item.input_path.cmp(&b.item.input_path));

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - succeeded;

    if total > 0 && succeeded == 0 {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(OcrError::AllItemsFailed {
            total,
            retries: config.max_retries,
            first_error,
        });
    }

    let total_duration_ms = run_start.elapsed().as_millis() as u64;
    let stats = RunStats {
        total_items: total,
        succeeded,
        failed,
        skipped,
        success_rate: if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        },
        total_duration_ms,
        avg_item_ms: if total == 0 {
            0
        } else {
            total_duration_ms / total as u64
        },
        batches: batch_number,
        adjustment_count: config.adaptive.then(|| state.adjustment_count()),
        final_batch_size: state.batch_size(),
        final_batch_delay_ms: state.batch_delay_ms(),
    };

    info!(
        succeeded,
        failed,
        duration_ms = stats.total_duration_ms,
        "run complete"
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total, succeeded);
    }

    Ok(RunOutput { results, stats })
}

/// Process one item end-to-end: retry-wrapped recognition, text assembly,
/// artifact write. Always returns an [`ItemResult`]; never propagates.
async fn process_one(recognizer: &dyn Recognizer, mut item: WorkItem, config: &OcrConfig) -> ItemResult {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_item_start(&item.input_path);
    }

    let result = match retry::recognize_with_retry(recognizer, &mut item, config).await {
        Ok(recognition) => {
            let text = assemble::assemble(&recognition.segments, config.short_text_threshold);
            match write_artifact(&item.output_path, &config.encoding.encode(&text)).await {
                Ok(()) => {
                    item.status = ItemStatus::Succeeded;
                    let attempts = item.attempt + 1;
                    ItemResult {
                        item,
                        text: Some(text),
                        language: recognition.language,
                        error: None,
                        attempts,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                }
                Err(e) => {
                    item.status = ItemStatus::Failed;
                    let attempts = item.attempt + 1;
                    let error = ItemError::WriteFailed {
                        path: item.output_path.clone(),
                        detail: e.to_string(),
                    };
                    warn!(path = %item.input_path.display(), %error, "artifact write failed");
                    ItemResult {
                        item,
                        text: None,
                        language: None,
                        error: Some(error),
                        attempts,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                }
            }
        }
        Err(error) => {
            let attempts = item.attempt + 1;
            ItemResult {
                item,
                text: None,
                language: None,
                error: Some(error),
                attempts,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    if let Some(ref cb) = config.progress_callback {
        match &result.error {
            None => cb.on_item_complete(
                &result.item.input_path,
                result.text.as_ref().map(|t| t.len()).unwrap_or(0),
            ),
            Some(e) => cb.on_item_error(&result.item.input_path, &e.to_string()),
        }
    }
    result
}

/// Atomic artifact write: temp file alongside the target, then rename.
///
/// Prevents a crash mid-write from leaving a truncated `.txt` that a later
/// merge pass would happily fold in.
async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}
