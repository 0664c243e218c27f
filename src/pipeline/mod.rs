//! Pipeline stages for batch image-to-text conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. a different recognition backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ runner ──▶ retry ──▶ assemble          merge
//! (walk tree)  (≤N live)  (backoff)  (fragments→text)  (per directory)
//!                 ▲
//!                 └── rate (batch size/delay feedback between batches)
//! ```
//!
//! 1. [`discover`] — walk the input tree, validate, map output paths
//! 2. [`runner`]   — drain a batch with bounded concurrency
//! 3. [`retry`]    — per-item attempt loop with classified backoff; the only
//!    stage with network I/O (via the injected recognizer)
//! 4. [`rate`]     — adjust the next batch's size and delay from trailing
//!    success rates
//! 5. [`assemble`] — deterministic fragment joining into one text body
//! 6. [`merge`]    — consolidate per-directory artifacts, idempotently

pub mod assemble;
pub mod discover;
pub mod merge;
pub mod rate;
pub mod retry;
pub mod runner;
