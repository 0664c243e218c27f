//! Integration tests for the batch pipeline.
//!
//! These run the full orchestration loop against mock recognizers and
//! tempfile trees — no network, no real OCR. Timings are shrunk to
//! milliseconds so the whole suite stays fast.

use async_trait::async_trait;
use img2text::{
    discover, merge_tree, run, OcrConfig, OcrError, RateConfig, Recognition, RecognizeError,
    Recognizer, RunProgressCallback, TextSegment,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn touch(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A config with timings shrunk so tests don't actually wait.
fn fast_config() -> OcrConfig {
    OcrConfig::builder()
        .base_retry_delay_ms(1)
        .max_retry_delay_ms(10)
        .rate(RateConfig {
            initial_batch_size: 10,
            initial_batch_delay_ms: 1,
            min_batch_delay_ms: 1,
            max_batch_delay_ms: 10,
            adjustment_interval: 1,
            ..RateConfig::default()
        })
        .build()
        .unwrap()
}

/// Succeeds for every image, returning fragments derived from the file name;
/// fails (permanently) for paths whose file name contains `fail`.
struct ScriptedRecognizer {
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, image: &Path) -> Result<Recognition, RecognizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = image.file_stem().unwrap().to_string_lossy().to_string();
        if name.contains("fail") {
            return Err(RecognizeError::Status {
                status: 500,
                detail: format!("server choked on {name}"),
            });
        }
        Ok(Recognition {
            segments: vec![TextSegment {
                text: format!("text of {name}"),
            }],
            language: Some("en".into()),
        })
    }
}

/// Records batch-completion events so tests can watch the controller react.
#[derive(Default)]
struct BatchWatcher {
    events: Mutex<Vec<(usize, f64, usize)>>,
    item_starts: Mutex<Vec<PathBuf>>,
}

impl RunProgressCallback for BatchWatcher {
    fn on_item_start(&self, input: &Path) {
        self.item_starts.lock().unwrap().push(input.to_path_buf());
    }
    fn on_batch_complete(&self, n: usize, rate: f64, next_size: usize, _delay: u64) {
        self.events.lock().unwrap().push((n, rate, next_size));
    }
}

// ── End-to-end runs ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_writes_artifacts_mirroring_the_tree() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("book/page_0001.png"), b"img");
    touch(&input.path().join("book/page_0002.png"), b"img");
    touch(&input.path().join("loose.jpg"), b"img");

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(result.stats.total_items, 3);
    assert_eq!(result.stats.succeeded, 3);
    assert_eq!(result.stats.failed, 0);
    assert!((result.stats.success_rate - 1.0).abs() < f64::EPSILON);

    let page1 = std::fs::read_to_string(output.path().join("book/page_0001.txt")).unwrap();
    assert_eq!(page1, "text of page_0001\n");
    assert!(output.path().join("loose.txt").exists());

    // Results come back in input-path order regardless of completion order.
    let order: Vec<_> = result
        .results
        .iter()
        .map(|r| r.item.input_path.clone())
        .collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[tokio::test]
async fn failures_are_isolated_and_logged() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("good_1.png"), b"img");
    touch(&input.path().join("will_fail.png"), b"img");
    touch(&input.path().join("good_2.png"), b"img");

    let log_path = output.path().join("errors.log");
    let mut config = fast_config();
    config.max_retries = 1;
    config.error_log = Some(log_path.clone());

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();

    assert_eq!(result.stats.succeeded, 2);
    assert_eq!(result.stats.failed, 1);
    assert!(output.path().join("good_1.txt").exists());
    assert!(output.path().join("good_2.txt").exists());
    assert!(
        !output.path().join("will_fail.txt").exists(),
        "failed items must not leave artifacts"
    );

    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("will_fail.png"));
    assert!(lines[0].contains("server choked"));

    let failure = result.failures().next().unwrap();
    assert_eq!(failure.attempts, 2, "initial call + 1 retry");
}

#[tokio::test]
async fn run_with_only_failures_is_fatal() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("fail_a.png"), b"img");
    touch(&input.path().join("fail_b.png"), b"img");

    let mut config = fast_config();
    config.max_retries = 0;

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await;

    match result {
        Err(OcrError::AllItemsFailed { total, .. }) => assert_eq!(total, 2),
        other => panic!("expected AllItemsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn limit_restricts_the_run_to_the_first_k_items() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.png", "b.png", "c.png", "d.png", "e.png"] {
        touch(&input.path().join(name), b"img");
    }

    let recognizer = Arc::new(ScriptedRecognizer::new());
    let mut config = fast_config();
    config.limit = Some(2);

    let result = run(input.path(), output.path(), recognizer.clone(), &config)
        .await
        .unwrap();

    assert_eq!(result.stats.total_items, 2);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
    assert!(output.path().join("a.txt").exists());
    assert!(output.path().join("b.txt").exists());
    assert!(!output.path().join("c.txt").exists());
}

// ── Concurrency bound (scenario: 10 items, bound 3) ──────────────────────────

struct GaugedRecognizer {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Recognizer for GaugedRecognizer {
    async fn recognize(&self, _image: &Path) -> Result<Recognition, RecognizeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Recognition {
            segments: vec![TextSegment { text: "x".into() }],
            language: None,
        })
    }
}

#[tokio::test]
async fn at_most_n_items_processing_at_once() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for i in 0..10 {
        touch(&input.path().join(format!("{i:02}.png")), b"img");
    }

    let recognizer = Arc::new(GaugedRecognizer {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = fast_config();
    config.concurrency = 3;

    run(input.path(), output.path(), recognizer.clone(), &config)
        .await
        .unwrap();

    let peak = recognizer.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrent recognitions was {peak}");
    assert!(peak > 0);
}

// ── Batch sequencing and the rate controller ─────────────────────────────────

#[tokio::test]
async fn batches_drain_before_the_next_starts_and_controller_scales_up() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for i in 0..25 {
        touch(&input.path().join(format!("{i:02}.png")), b"img");
    }

    let watcher = Arc::new(BatchWatcher::default());
    let mut config = fast_config();
    config.rate = RateConfig {
        initial_batch_size: 10,
        max_batch_size: 20,
        initial_batch_delay_ms: 1,
        min_batch_delay_ms: 1,
        max_batch_delay_ms: 10,
        adjustment_interval: 1,
        ..RateConfig::default()
    };
    config.progress_callback = Some(Arc::clone(&watcher) as Arc<dyn RunProgressCallback>);

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();

    // 25 items: batch of 10 (perfect) → controller picks 15 → batch of 15 →
    // controller picks 20 → queue empty.
    let events = watcher.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], (1, 1.0, 15));
    assert_eq!(events[1], (2, 1.0, 20));
    assert_eq!(result.stats.batches, 2);
    assert_eq!(result.stats.final_batch_size, 20);
    assert_eq!(result.stats.adjustment_count, Some(2));

    // Exactly the first 10 (sorted) items started before batch 1 completed.
    let starts = watcher.item_starts.lock().unwrap();
    let first_batch: Vec<_> = starts[..10]
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    let mut expected: Vec<String> = (0..10).map(|i| format!("{i:02}.png")).collect();
    expected.sort();
    let mut got = first_batch.clone();
    got.sort();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn disabling_adaptive_control_pins_batch_parameters() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for i in 0..12 {
        touch(&input.path().join(format!("{i:02}.png")), b"img");
    }

    let watcher = Arc::new(BatchWatcher::default());
    let mut config = fast_config();
    config.adaptive = false;
    config.rate.initial_batch_size = 4;
    config.progress_callback = Some(Arc::clone(&watcher) as Arc<dyn RunProgressCallback>);

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();

    assert_eq!(result.stats.batches, 3, "12 items at fixed size 4");
    assert_eq!(result.stats.final_batch_size, 4);
    assert_eq!(result.stats.adjustment_count, None);
    for (_, _, next_size) in watcher.events.lock().unwrap().iter() {
        assert_eq!(*next_size, 4);
    }
}

// ── Discovery + merge interplay ──────────────────────────────────────────────

#[tokio::test]
async fn merge_after_run_consolidates_each_directory() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("book/p1.png"), b"img");
    touch(&input.path().join("book/p2.png"), b"img");
    touch(&input.path().join("book/p3.png"), b"img");

    let config = fast_config();
    run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();

    let groups = merge_tree(output.path(), &config).unwrap();
    assert_eq!(groups.len(), 1);

    let merged = std::fs::read_to_string(output.path().join("book/book_merged.txt")).unwrap();
    assert_eq!(merged, "text of p1\n\ntext of p2\n\ntext of p3");

    // Re-running both merge passes is byte-identical (idempotence), and the
    // artifact never ingests itself.
    let again = merge_tree(output.path(), &config).unwrap();
    let merged_again =
        std::fs::read_to_string(output.path().join("book/book_merged.txt")).unwrap();
    assert_eq!(merged, merged_again);
    assert_eq!(again[0].member_files.len(), 3);
}

#[tokio::test]
async fn zero_byte_inputs_are_skipped_and_counted() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("ok.png"), b"img");
    touch(&input.path().join("empty.png"), b"");

    let config = fast_config();
    let discovery = discover(input.path(), output.path(), &config).unwrap();
    assert_eq!(discovery.items.len(), 1);
    assert_eq!(discovery.skipped.len(), 1);

    let result = run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(result.stats.total_items, 1);
    assert_eq!(result.stats.skipped, 1);
    assert!(!output.path().join("empty.txt").exists());
}

#[tokio::test]
async fn bom_encoding_round_trips_through_run_and_merge() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("d/page.png"), b"img");

    let mut config = fast_config();
    config.encoding = img2text::TextEncoding::Utf8Bom;

    run(
        input.path(),
        output.path(),
        Arc::new(ScriptedRecognizer::new()),
        &config,
    )
    .await
    .unwrap();

    let artifact = std::fs::read(output.path().join("d/page.txt")).unwrap();
    assert_eq!(&artifact[..3], b"\xEF\xBB\xBF");

    merge_tree(output.path(), &config).unwrap();
    let merged = std::fs::read(output.path().join("d/d_merged.txt")).unwrap();
    assert_eq!(&merged[..3], b"\xEF\xBB\xBF");
    // The merge trims the member's BOM-free text content, so the body is
    // the plain recognised text.
    assert_eq!(&merged[3..], b"text of page");
}

// ── Rate-limit handling end-to-end ───────────────────────────────────────────

/// Rate-limits the first `limited` calls, then succeeds.
struct ThrottledRecognizer {
    calls: AtomicUsize,
    limited: usize,
}

#[async_trait]
impl Recognizer for ThrottledRecognizer {
    async fn recognize(&self, _image: &Path) -> Result<Recognition, RecognizeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.limited {
            return Err(RecognizeError::Status {
                status: 429,
                detail: "Too Many Requests".into(),
            });
        }
        Ok(Recognition {
            segments: vec![TextSegment {
                text: "recovered".into(),
            }],
            language: None,
        })
    }
}

#[tokio::test]
async fn rate_limited_items_recover_via_retries() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    touch(&input.path().join("page.png"), b"img");

    let recognizer = Arc::new(ThrottledRecognizer {
        calls: AtomicUsize::new(0),
        limited: 2,
    });
    let config = fast_config();

    let result = run(input.path(), output.path(), recognizer.clone(), &config)
        .await
        .unwrap();

    assert_eq!(result.stats.succeeded, 1);
    assert_eq!(result.results[0].attempts, 3, "two 429s then success");
    assert_eq!(
        std::fs::read_to_string(output.path().join("page.txt")).unwrap(),
        "recovered\n"
    );
}
