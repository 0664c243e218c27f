//! Configuration types for a batch OCR run.
//!
//! All run behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share configs across tasks, log them, and diff two runs to understand why
//! their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::OcrError;
use crate::pipeline::rate::RateConfig;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a batch OCR run.
///
/// Built via [`OcrConfig::builder()`] or using [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use img2text::OcrConfig;
///
/// let config = OcrConfig::builder()
///     .concurrency(5)
///     .max_retries(4)
///     .limit(20)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// File extensions considered eligible input (lowercase, no dot).
    /// Default: `png`, `jpg`, `jpeg`.
    pub extensions: Vec<String>,

    /// Number of concurrent recognition calls within a batch. Default: 10.
    ///
    /// OCR endpoints are network-bound, not CPU-bound. Issuing 10 calls at
    /// once typically cuts wall-clock time by 8–9× compared to sequential
    /// processing. If the endpoint answers with 429s even after the rate
    /// controller backs off, lower this.
    pub concurrency: usize,

    /// Restrict the run to the first K discovered items (sorted order).
    /// Default: None (process everything).
    ///
    /// This is the smoke-test mode: point the pipeline at a large archive and
    /// confirm end-to-end behaviour on a handful of pages before committing
    /// to the full run.
    pub limit: Option<usize>,

    /// Maximum retry attempts per item on a transient failure. Default: 3.
    ///
    /// The initial call plus `max_retries` re-attempts; an item is marked
    /// failed only after the final retry also fails. Retries never block
    /// other in-flight items.
    pub max_retries: u32,

    /// Base retry delay in milliseconds. Default: 1000.
    pub base_retry_delay_ms: u64,

    /// Extra multiplier applied to the retry delay when the failure was
    /// classified as a rate-limit response. Default: 2.0.
    ///
    /// A 429 means the endpoint is telling us to slow down; waiting the plain
    /// base delay would usually just burn a retry on the same answer.
    pub rate_limit_retry_multiplier: f64,

    /// Apply `2^attempt` exponential growth to retry delays. Default: true.
    pub exponential_backoff: bool,

    /// Upper bound on a single retry delay in milliseconds. Default: 30_000.
    pub max_retry_delay_ms: u64,

    /// Per-recognition-call timeout in seconds. Default: 60.
    ///
    /// A stuck call is bounded by this timeout and surfaces as a retryable
    /// failure; there is no mid-call cancellation beyond it.
    pub api_timeout_secs: u64,

    /// Enable the adaptive rate controller. Default: true.
    ///
    /// When disabled, every batch uses `rate.initial_batch_size` and
    /// `rate.initial_batch_delay_ms` unchanged.
    pub adaptive: bool,

    /// Rate-controller tuning (batch size/delay bounds, thresholds, cadence).
    pub rate: RateConfig,

    /// Fragments shorter than this many characters always end their line
    /// during text assembly. Default: 10.
    pub short_text_threshold: usize,

    /// Suffix appended to the directory name for merged artifacts.
    /// Default: `_merged`. Files whose stem ends with this suffix are never
    /// re-ingested by the merge scan.
    pub merge_suffix: String,

    /// Encoding used for written text artifacts. Default: UTF-8 without BOM.
    pub encoding: TextEncoding,

    /// Files larger than this produce a warning at discovery time (they are
    /// still processed). Default: 20 MB — the ballpark upload cap of the
    /// OCR endpoints this tool targets.
    pub max_file_bytes: u64,

    /// Append-only error log path. Default: None (no log file).
    ///
    /// One `path<TAB>message` line per permanently failed item, created
    /// lazily on the first failure.
    pub error_log: Option<PathBuf>,

    /// Optional progress callback receiving per-item and per-batch events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            concurrency: 10,
            limit: None,
            max_retries: 3,
            base_retry_delay_ms: 1000,
            rate_limit_retry_multiplier: 2.0,
            exponential_backoff: true,
            max_retry_delay_ms: 30_000,
            api_timeout_secs: 60,
            adaptive: true,
            rate: RateConfig::default(),
            short_text_threshold: 10,
            merge_suffix: "_merged".into(),
            encoding: TextEncoding::Utf8,
            max_file_bytes: 20 * 1024 * 1024,
            error_log: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("extensions", &self.extensions)
            .field("concurrency", &self.concurrency)
            .field("limit", &self.limit)
            .field("max_retries", &self.max_retries)
            .field("base_retry_delay_ms", &self.base_retry_delay_ms)
            .field(
                "rate_limit_retry_multiplier",
                &self.rate_limit_retry_multiplier,
            )
            .field("exponential_backoff", &self.exponential_backoff)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("adaptive", &self.adaptive)
            .field("rate", &self.rate)
            .field("short_text_threshold", &self.short_text_threshold)
            .field("merge_suffix", &self.merge_suffix)
            .field("encoding", &self.encoding)
            .field("error_log", &self.error_log)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// The per-call timeout as a `Duration`.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn limit(mut self, k: usize) -> Self {
        self.config.limit = Some(k);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn base_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.base_retry_delay_ms = ms;
        self
    }

    pub fn rate_limit_retry_multiplier(mut self, m: f64) -> Self {
        self.config.rate_limit_retry_multiplier = m.max(1.0);
        self
    }

    pub fn exponential_backoff(mut self, v: bool) -> Self {
        self.config.exponential_backoff = v;
        self
    }

    pub fn max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_retry_delay_ms = ms.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn adaptive(mut self, v: bool) -> Self {
        self.config.adaptive = v;
        self
    }

    pub fn rate(mut self, rate: RateConfig) -> Self {
        self.config.rate = rate;
        self
    }

    pub fn short_text_threshold(mut self, chars: usize) -> Self {
        self.config.short_text_threshold = chars;
        self
    }

    pub fn merge_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.merge_suffix = suffix.into();
        self
    }

    pub fn encoding(mut self, enc: TextEncoding) -> Self {
        self.config.encoding = enc;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.error_log = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.extensions.is_empty() {
            return Err(OcrError::InvalidConfig(
                "At least one input extension is required".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.merge_suffix.is_empty() {
            return Err(OcrError::InvalidConfig(
                "Merge suffix must be non-empty (merged artifacts are filtered by it)".into(),
            ));
        }
        self.config.rate.validate()?;
        Ok(self.config)
    }
}

/// Encoding for written text artifacts.
///
/// The OCR output itself is always Unicode; this only controls how the bytes
/// land on disk. `Utf8Bom` exists for downstream tools (notably on Windows)
/// that sniff a BOM to detect UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    /// Plain UTF-8, no byte-order mark. (default)
    #[default]
    Utf8,
    /// UTF-8 with a leading BOM (`EF BB BF`).
    Utf8Bom,
}

impl TextEncoding {
    /// Encode `text` into the bytes to write.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf8Bom => {
                let mut out = Vec::with_capacity(3 + text.len());
                out.extend_from_slice(b"\xEF\xBB\xBF");
                out.extend_from_slice(text.as_bytes());
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_valid() {
        let config = OcrConfig::builder().build().unwrap();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.max_retries, 3);
        assert!(config.adaptive);
        assert_eq!(config.extensions, vec!["png", "jpg", "jpeg"]);
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let config = OcrConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn extensions_normalised() {
        let config = OcrConfig::builder()
            .extensions([".PNG", "Jpg"])
            .build()
            .unwrap();
        assert_eq!(config.extensions, vec!["png", "jpg"]);
    }

    #[test]
    fn empty_extensions_rejected() {
        let result = OcrConfig::builder().extensions(Vec::<String>::new()).build();
        assert!(result.is_err());
    }

    #[test]
    fn empty_merge_suffix_rejected() {
        let result = OcrConfig::builder().merge_suffix("").build();
        assert!(result.is_err());
    }

    #[test]
    fn utf8_bom_prefix() {
        let bytes = TextEncoding::Utf8Bom.encode("hi");
        assert_eq!(&bytes[..3], b"\xEF\xBB\xBF");
        assert_eq!(&bytes[3..], b"hi");
        assert_eq!(TextEncoding::Utf8.encode("hi"), b"hi");
    }
}
