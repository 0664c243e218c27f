//! # img2text
//!
//! Batch-convert a tree of page images into text files by calling a remote
//! OCR endpoint, under adaptive rate control.
//!
//! ## Why this crate?
//!
//! The recognition itself is someone else's problem — an opaque, flaky,
//! rate-limited remote call. The hard part is running thousands of those
//! calls concurrently against an API whose real limits are unknown and
//! drift over time, without melting into a wall of 429s and without losing
//! the per-folder ordering the final merged artifacts depend on. This crate
//! is that engine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image tree
//!  │
//!  ├─ 1. Discover  walk the input root, validate, map output paths
//!  ├─ 2. Batch     partition items into rate-controlled batches
//!  ├─ 3. Recognize ≤N concurrent calls, classified retry/backoff per item
//!  ├─ 4. Assemble  recognised fragments → one text body per image
//!  ├─ 5. Write     one .txt per image, mirroring the input tree
//!  └─ 6. Merge     one consolidated .txt per directory (idempotent)
//! ```
//!
//! Between batches a feedback controller inspects the trailing success rate
//! and grows or shrinks the batch size and inter-batch delay — scaling up
//! while the endpoint is happy, backing off the moment it is not.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2text::{run, merge_tree, HttpRecognizer, OcrConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let recognizer = Arc::new(HttpRecognizer::new(
//!         "https://ocr.example.net/v1/recognize",
//!         std::env::var("OCR_API_KEY").ok(),
//!     )?);
//!     let config = OcrConfig::default();
//!
//!     let output = run(
//!         Path::new("scans/"),
//!         Path::new("text/"),
//!         recognizer,
//!         &config,
//!     )
//!     .await?;
//!     eprintln!(
//!         "{}/{} items in {}ms",
//!         output.stats.succeeded, output.stats.total_items, output.stats.total_duration_ms
//!     );
//!
//!     merge_tree(Path::new("text/"), &config)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2text` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! img2text = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod recognize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OcrConfig, OcrConfigBuilder, TextEncoding};
pub use error::{ItemError, OcrError};
pub use orchestrator::run;
pub use output::{ErrorLog, ItemResult, ItemStatus, RunOutput, RunStats, WorkItem};
pub use pipeline::discover::{discover, Discovery};
pub use pipeline::merge::{merge_tree, MergeGroup};
pub use pipeline::rate::{BatchOutcome, RateConfig, RateState};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use recognize::{HttpRecognizer, Recognition, RecognizeError, Recognizer, TextSegment};
