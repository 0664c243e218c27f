//! Error types for the img2text library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] — **Fatal**: the run cannot proceed at all (missing input
//!   root, unwritable output root, bad configuration, no endpoint). Returned
//!   as `Err(OcrError)` from the top-level run functions.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed (timeout, transient
//!   API error, retries exhausted) but all other items are fine. Stored inside
//!   [`crate::output::ItemResult`] so callers can inspect partial success
//!   rather than losing the whole run to one bad page.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! item failure, log and continue, or collect all errors for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the img2text library.
///
/// Item-level failures use [`ItemError`] and are stored in
/// [`crate::output::ItemResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input root directory was not found.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputRootNotFound { path: PathBuf },

    /// The input root exists but is not a directory.
    #[error("Input path '{path}' is not a directory")]
    InputRootNotADirectory { path: PathBuf },

    /// Process does not have read permission on the input root.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Discovery found no eligible image files under the input root.
    #[error("No image files found under '{path}' (looked for: {extensions})")]
    NoItemsFound { path: PathBuf, extensions: String },

    // ── Run errors ────────────────────────────────────────────────────────
    /// Every item failed after all retries; no output was produced.
    #[error("All {total} items failed after {retries} retries each.\nFirst error: {first_error}")]
    AllItemsFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not append to the error log.
    #[error("Failed to write error log '{path}': {source}")]
    ErrorLogFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed below the input root.
    #[error("Failed to read directory '{path}': {source}")]
    WalkFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No recognition endpoint was configured for the HTTP recognizer.
    #[error("OCR endpoint is not configured.\n{hint}")]
    EndpointNotConfigured { hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single work item.
///
/// Stored alongside [`crate::output::ItemResult`] when an item fails.
/// The overall run continues unless ALL items fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// Recognition failed after all retries were exhausted.
    #[error("'{path}': recognition failed after {attempts} attempts: {detail}")]
    RecognitionFailed {
        path: PathBuf,
        attempts: u32,
        detail: String,
        /// Whether the final failure was classified as a rate-limit response.
        rate_limited: bool,
    },

    /// A single recognition call exceeded the per-call timeout.
    ///
    /// Only surfaces here when the timeout was the *final* attempt's failure;
    /// earlier timeouts are retried like any other transient error.
    #[error("'{path}': recognition timed out after {secs}s")]
    Timeout { path: PathBuf, secs: u64 },

    /// The per-item text artifact could not be written.
    #[error("'{path}': failed to write output: {detail}")]
    WriteFailed { path: PathBuf, detail: String },
}

impl ItemError {
    /// The input path the failure belongs to.
    pub fn path(&self) -> &PathBuf {
        match self {
            ItemError::RecognitionFailed { path, .. } => path,
            ItemError::Timeout { path, .. } => path,
            ItemError::WriteFailed { path, .. } => path,
        }
    }
}
