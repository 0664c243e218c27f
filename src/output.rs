//! Work-item data model, per-item results, and run summaries.
//!
//! A [`WorkItem`] is created once per discovered image and mutated only by
//! the retry policy (attempt count) and the runner (status transitions);
//! once its terminal [`ItemResult`] is recorded the item travels inside the
//! result and is never touched again. The run-level roll-up lives in
//! [`RunStats`], which is what the CLI prints and serialises.

use crate::error::{ItemError, OcrError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lifecycle of a work item.
///
/// `Pending → Processing → Succeeded`, or `Pending → Processing → …
/// (retries) → Succeeded | Failed`. No re-entry after a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Discovered, not yet started.
    Pending,
    /// A recognition attempt (or its backoff wait) is in flight.
    Processing,
    /// Text artifact written. Terminal.
    Succeeded,
    /// Retries exhausted. Terminal.
    Failed,
}

impl ItemStatus {
    /// Whether the item has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Succeeded | ItemStatus::Failed)
    }
}

/// One input image scheduled for processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Path of the source image under the input root.
    pub input_path: PathBuf,
    /// Path the text artifact will be written to under the output root.
    pub output_path: PathBuf,
    /// Retries consumed so far (0 = only the initial attempt has run).
    pub attempt: u32,
    /// Current lifecycle state.
    pub status: ItemStatus,
}

impl WorkItem {
    /// A fresh, pending item.
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            input_path,
            output_path,
            attempt: 0,
            status: ItemStatus::Pending,
        }
    }
}

/// The immutable outcome of one work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// The item, carrying its terminal status and final attempt count.
    pub item: WorkItem,
    /// Assembled text body (present iff the item succeeded).
    pub text: Option<String>,
    /// Language tag reported by the recognizer, if any.
    pub language: Option<String>,
    /// The permanent failure, if the item failed.
    pub error: Option<ItemError>,
    /// Total recognition calls made (initial attempt + retries).
    pub attempts: u32,
    /// Wall-clock time spent on this item, including backoff waits.
    pub duration_ms: u64,
}

impl ItemResult {
    /// Whether the item ended `Succeeded`.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Items discovered and scheduled (after any `--limit`).
    pub total_items: usize,
    /// Items that produced a text artifact.
    pub succeeded: usize,
    /// Items that failed permanently.
    pub failed: usize,
    /// Files excluded at discovery time (validation failures).
    pub skipped: usize,
    /// `succeeded / total_items`, 0.0 when nothing was scheduled.
    pub success_rate: f64,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
    /// Mean wall-clock time per scheduled item.
    pub avg_item_ms: u64,
    /// Number of batches executed.
    pub batches: usize,
    /// How many rate-controller adjustments actually changed a value
    /// (None when adaptive control was disabled).
    pub adjustment_count: Option<u32>,
    /// Batch size in effect after the last batch.
    pub final_batch_size: usize,
    /// Inter-batch delay in effect after the last batch, in ms.
    pub final_batch_delay_ms: u64,
}

/// Everything a run produced: per-item results plus the roll-up.
#[derive(Debug, Serialize)]
pub struct RunOutput {
    /// One entry per scheduled item, in input-path order.
    pub results: Vec<ItemResult>,
    /// Aggregate statistics.
    pub stats: RunStats,
}

impl RunOutput {
    /// The permanent failures, in input-path order.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// Append-only error log: one `path<TAB>message` line per permanent failure.
///
/// The file is created lazily on the first append so clean runs leave no
/// empty log behind.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one failure record.
    pub fn append(&self, input: &Path, message: &str) -> Result<(), OcrError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OcrError::ErrorLogFailed {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| OcrError::ErrorLogFailed {
                path: self.path.clone(),
                source: e,
            })?;
        // Keep each record on one line so the log stays grep-able.
        let message = message.replace('\n', " ");
        writeln!(file, "{}\t{}", input.display(), message).map_err(|e| {
            OcrError::ErrorLogFailed {
                path: self.path.clone(),
                source: e,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
        assert!(ItemStatus::Succeeded.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
    }

    #[test]
    fn new_item_starts_pending() {
        let item = WorkItem::new(PathBuf::from("in/a.png"), PathBuf::from("out/a.txt"));
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempt, 0);
    }

    #[test]
    fn error_log_appends_single_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.log"));

        log.append(Path::new("a.png"), "HTTP 429: slow down").unwrap();
        log.append(Path::new("b.png"), "multi\nline\nmessage").unwrap();

        let content = std::fs::read_to_string(dir.path().join("errors.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a.png\tHTTP 429: slow down");
        assert_eq!(lines[1], "b.png\tmulti line message");
    }

    #[test]
    fn error_log_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let _log = ErrorLog::new(path.clone());
        assert!(!path.exists(), "log must not exist before the first append");
    }
}
