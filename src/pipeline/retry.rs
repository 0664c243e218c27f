//! Per-item retry policy: classification, backoff, and the attempt loop.
//!
//! ## Retry strategy
//!
//! HTTP 429 / quota errors from OCR endpoints are transient and frequent
//! under concurrent load, and they deserve a longer wait than a network blip:
//! retrying a rate-limit response after the plain base delay usually just
//! burns the retry on the same answer. So classification happens once per
//! failure and only changes the backoff magnitude — every transient failure
//! is retried up to the same bound either way.
//!
//! With the defaults (base 1000 ms, rate-limit multiplier 2, exponential
//! backoff, cap 30 s) a persistently rate-limited item waits
//! 2 s → 4 s → 8 s before failing permanently. The waits happen inside the
//! item's own task; other in-flight items are unaffected.

use crate::config::OcrConfig;
use crate::error::ItemError;
use crate::output::{ItemStatus, WorkItem};
use crate::recognize::{Recognition, RecognizeError, Recognizer};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Substrings that mark a failure as rate-limit-flavoured, checked
/// case-insensitively against the error message.
const RATE_LIMIT_MARKERS: [&str; 4] = ["rate limit", "quota exceeded", "too many requests", "429"];

/// Classify a recognition failure. Derived once at failure time; affects
/// backoff magnitude only, never whether a retry happens.
pub fn is_rate_limited(error: &RecognizeError) -> bool {
    if error.status() == Some(429) {
        return true;
    }
    let message = error.to_string().to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m))
}

/// Delay before re-attempting after the failure of retry number `attempt`
/// (0 = the initial call failed).
///
/// `base × rate-limit multiplier? × 2^attempt?`, clamped to the cap.
pub fn retry_delay(attempt: u32, rate_limited: bool, config: &OcrConfig) -> Duration {
    let mut ms = config.base_retry_delay_ms as f64;
    if rate_limited {
        ms *= config.rate_limit_retry_multiplier;
    }
    if config.exponential_backoff {
        ms *= 2f64.powi(attempt.min(31) as i32);
    }
    let clamped = (ms.round() as u64).min(config.max_retry_delay_ms);
    Duration::from_millis(clamped)
}

/// Run the attempt loop for one item: call the recognizer under the per-call
/// timeout, classify failures, back off, and re-attempt up to
/// `config.max_retries`.
///
/// On success the item is left `Processing` — the caller promotes it to
/// `Succeeded` once the text artifact is on disk (a failed write is still a
/// failed item). On exhaustion the item is marked `Failed` here and the
/// final error is returned; the caller records it, it never propagates.
pub async fn recognize_with_retry(
    recognizer: &dyn Recognizer,
    item: &mut WorkItem,
    config: &OcrConfig,
) -> Result<Recognition, ItemError> {
    item.status = ItemStatus::Processing;

    loop {
        let outcome = timeout(config.api_timeout(), recognizer.recognize(&item.input_path)).await;

        let (detail, rate_limited, timed_out) = match outcome {
            Ok(Ok(recognition)) => return Ok(recognition),
            Ok(Err(e)) => (e.to_string(), is_rate_limited(&e), false),
            Err(_) => (
                format!("timed out after {}s", config.api_timeout_secs),
                false,
                true,
            ),
        };

        if item.attempt < config.max_retries {
            let delay = retry_delay(item.attempt, rate_limited, config);
            warn!(
                path = %item.input_path.display(),
                attempt = item.attempt + 1,
                max = config.max_retries,
                delay_ms = delay.as_millis() as u64,
                rate_limited,
                %detail,
                "recognition failed, retrying"
            );
            sleep(delay).await;
            item.attempt += 1;
        } else {
            item.status = ItemStatus::Failed;
            let attempts = item.attempt + 1;
            return Err(if timed_out {
                ItemError::Timeout {
                    path: item.input_path.clone(),
                    secs: config.api_timeout_secs,
                }
            } else {
                ItemError::RecognitionFailed {
                    path: item.input_path.clone(),
                    attempts,
                    detail,
                    rate_limited,
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::TextSegment;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyRecognizer {
        calls: AtomicU32,
        fail_first: u32,
        error: fn() -> RecognizeError,
    }

    #[async_trait]
    impl Recognizer for FlakyRecognizer {
        async fn recognize(&self, _image: &Path) -> Result<Recognition, RecognizeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok(Recognition {
                    segments: vec![TextSegment {
                        text: "recovered".into(),
                    }],
                    language: Some("en".into()),
                })
            }
        }
    }

    fn rate_limit_error() -> RecognizeError {
        RecognizeError::Status {
            status: 429,
            detail: "Too Many Requests".into(),
        }
    }

    fn server_error() -> RecognizeError {
        RecognizeError::Status {
            status: 500,
            detail: "internal error".into(),
        }
    }

    fn scenario_config() -> OcrConfig {
        OcrConfig::builder()
            .max_retries(3)
            .base_retry_delay_ms(1000)
            .rate_limit_retry_multiplier(2.0)
            .exponential_backoff(true)
            .max_retry_delay_ms(30_000)
            .build()
            .unwrap()
    }

    #[test]
    fn classification_catches_known_markers() {
        assert!(is_rate_limited(&rate_limit_error()));
        assert!(is_rate_limited(&RecognizeError::Network(
            "Rate Limit reached for this key".into()
        )));
        assert!(is_rate_limited(&RecognizeError::Status {
            status: 403,
            detail: "quota exceeded for project".into(),
        }));
        assert!(is_rate_limited(&RecognizeError::Network(
            "too many requests, slow down".into()
        )));
        assert!(!is_rate_limited(&server_error()));
        assert!(!is_rate_limited(&RecognizeError::Network(
            "connection reset by peer".into()
        )));
    }

    #[test]
    fn rate_limited_backoff_sequence_is_doubling_from_two_seconds() {
        let config = scenario_config();
        assert_eq!(
            retry_delay(0, true, &config),
            Duration::from_millis(2000)
        );
        assert_eq!(
            retry_delay(1, true, &config),
            Duration::from_millis(4000)
        );
        assert_eq!(
            retry_delay(2, true, &config),
            Duration::from_millis(8000)
        );
    }

    #[test]
    fn backoff_is_clamped_to_cap() {
        let config = scenario_config();
        // 1000 × 2 × 2^5 = 64 000 → capped.
        assert_eq!(
            retry_delay(5, true, &config),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn plain_failures_skip_the_rate_limit_multiplier() {
        let config = scenario_config();
        assert_eq!(
            retry_delay(0, false, &config),
            Duration::from_millis(1000)
        );
        assert_eq!(
            retry_delay(2, false, &config),
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn linear_backoff_when_exponential_disabled() {
        let config = OcrConfig::builder()
            .base_retry_delay_ms(500)
            .exponential_backoff(false)
            .build()
            .unwrap();
        assert_eq!(retry_delay(4, false, &config), Duration::from_millis(500));
        assert_eq!(retry_delay(4, true, &config), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mark_failed_with_attempt_bound() {
        let recognizer = FlakyRecognizer {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: rate_limit_error,
        };
        let config = scenario_config();
        let mut item = WorkItem::new(PathBuf::from("page.png"), PathBuf::from("page.txt"));

        let err = recognize_with_retry(&recognizer, &mut item, &config)
            .await
            .unwrap_err();

        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempt, 3, "attempt never exceeds max_retries");
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 4, "initial + 3 retries");
        match err {
            ItemError::RecognitionFailed {
                attempts,
                rate_limited,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert!(rate_limited);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let recognizer = FlakyRecognizer {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error: server_error,
        };
        let config = scenario_config();
        let mut item = WorkItem::new(PathBuf::from("page.png"), PathBuf::from("page.txt"));

        let recognition = recognize_with_retry(&recognizer, &mut item, &config)
            .await
            .unwrap();

        assert_eq!(recognition.segments.len(), 1);
        assert_eq!(item.attempt, 2);
        // Promotion to Succeeded happens after the artifact write, not here.
        assert_eq!(item.status, ItemStatus::Processing);
    }
}
