//! CLI binary for img2text.
//!
//! A thin shim over the library crate that maps CLI flags to `OcrConfig`
//! and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use img2text::{
    merge_tree, run, HttpRecognizer, OcrConfig, ProgressCallback, RateConfig, Recognizer,
    RunProgressCallback, TextEncoding,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-item log
/// lines using [indicatif]. Designed to work correctly when items complete
/// out-of-order within a batch.
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-item wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    /// Count of items that errored out.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically by
    /// `on_run_start` (called after discovery, before any batch).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Discovering images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Recognising");
        self.bar.reset_eta();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_items: usize) {
        self.activate_bar(total_items);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting recognition of {total_items} images…"))
        ));
    }

    fn on_item_start(&self, input: &Path) {
        self.start_times
            .lock()
            .unwrap()
            .insert(input.to_path_buf(), Instant::now());
        if let Some(name) = input.file_name().and_then(|n| n.to_str()) {
            self.bar.set_message(name.to_string());
        }
    }

    fn on_item_complete(&self, input: &Path, text_len: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(input)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} {:<40}  {:<12}  {}",
            green("✓"),
            input.file_name().and_then(|n| n.to_str()).unwrap_or("?"),
            dim(&format!("{text_len:>6} chars")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, input: &Path, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(input)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let truncated: String = error.chars().take(79).collect();
            format!("{truncated}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            input.file_name().and_then(|n| n.to_str()).unwrap_or("?"),
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(
        &self,
        batch_number: usize,
        success_rate: f64,
        next_batch_size: usize,
        next_delay_ms: u64,
    ) {
        self.bar.println(format!(
            "{} batch {}  {}  {}",
            cyan("▸"),
            batch_number,
            dim(&format!("{:.0}% ok", success_rate * 100.0)),
            dim(&format!("next: {next_batch_size} items / {next_delay_ms}ms pause")),
        ));
    }

    fn on_run_complete(&self, total_items: usize, succeeded: usize) {
        let failed = total_items.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} images recognised successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images recognised  ({} failed)",
                if failed == total_items {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_items,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic run (per-image .txt files plus per-directory merged files)
  img2text ./scans -o ./text --endpoint https://ocr.example.net/v1/recognize

  # Smoke-test the pipeline on the first 5 images
  img2text ./scans -o ./text --limit 5

  # Fixed batch parameters, no adaptive control
  img2text ./scans -o ./text --no-adaptive --batch-size 8 --batch-delay-ms 1000

  # Re-merge an existing output tree without touching the endpoint
  img2text ./scans -o ./text --merge-only

  # Machine-readable summary
  img2text ./scans -o ./text --json > run.json

HOW THE RATE CONTROLLER WORKS:
  Items are processed in batches. After each batch the controller looks at
  the trailing success rate (last 3 batches):

    ≥ 95%  →  batch size × 1.5 (capped), pause ÷ 1.5 (floored)
    ≤ 80%  →  batch size ÷ 1.5 (floored), pause × 1.5 (capped)
    else   →  unchanged

  Every value is rounded then clamped, so the configured bounds always hold.
  Rate-limited failures (HTTP 429, "quota exceeded", …) additionally get a
  longer per-item retry backoff than ordinary transient errors.

ENVIRONMENT VARIABLES:
  OCR_ENDPOINT    Recognition endpoint URL (same as --endpoint)
  OCR_API_KEY     Bearer token sent with each recognition request
"#;

/// Batch-convert page images to text via a remote OCR endpoint.
#[derive(Parser, Debug)]
#[command(
    name = "img2text",
    version,
    about = "Batch-convert page images to text via a remote OCR endpoint",
    long_about = "Walk a directory tree of page images, recognise each through a remote OCR \
endpoint under adaptive rate control, write one text file per image, and merge each \
directory's results into a consolidated text file.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory tree containing the input images.
    input: PathBuf,

    /// Root directory for text output (mirrors the input structure).
    #[arg(short, long, env = "IMG2TEXT_OUTPUT", default_value = "./text_output")]
    output: PathBuf,

    /// Recognition endpoint URL.
    #[arg(long, env = "OCR_ENDPOINT")]
    endpoint: Option<String>,

    /// Comma-separated list of input file extensions.
    #[arg(long, env = "IMG2TEXT_EXTENSIONS", default_value = "png,jpg,jpeg")]
    extensions: String,

    /// Number of concurrent recognition calls within a batch.
    #[arg(short, long, env = "IMG2TEXT_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Process only the first K images (smoke-test mode).
    #[arg(short, long, env = "IMG2TEXT_LIMIT")]
    limit: Option<usize>,

    /// Retries per image on a transient failure.
    #[arg(long, env = "IMG2TEXT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call timeout in seconds.
    #[arg(long, env = "IMG2TEXT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Initial (and, with --no-adaptive, fixed) batch size.
    #[arg(long, env = "IMG2TEXT_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Initial (and, with --no-adaptive, fixed) inter-batch delay in ms.
    #[arg(long, env = "IMG2TEXT_BATCH_DELAY_MS", default_value_t = 2000)]
    batch_delay_ms: u64,

    /// Disable the adaptive rate controller.
    #[arg(long, env = "IMG2TEXT_NO_ADAPTIVE")]
    no_adaptive: bool,

    /// Output text encoding.
    #[arg(long, env = "IMG2TEXT_ENCODING", value_enum, default_value = "utf8")]
    encoding: EncodingArg,

    /// Error-log path (default: <output>/ocr_errors.log).
    #[arg(long, env = "IMG2TEXT_ERROR_LOG")]
    error_log: Option<PathBuf>,

    /// Skip the per-directory merge stage.
    #[arg(long)]
    no_merge: bool,

    /// Only run the merge stage over an existing output tree.
    #[arg(long, conflicts_with = "no_merge")]
    merge_only: bool,

    /// Print a JSON run summary instead of the human-readable one.
    #[arg(long, env = "IMG2TEXT_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "IMG2TEXT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2TEXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2TEXT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum EncodingArg {
    Utf8,
    Utf8Bom,
}

impl From<EncodingArg> for TextEncoding {
    fn from(v: EncodingArg) -> Self {
        match v {
            EncodingArg::Utf8 => TextEncoding::Utf8,
            EncodingArg::Utf8Bom => TextEncoding::Utf8Bom,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.merge_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Merge-only mode ──────────────────────────────────────────────────
    if cli.merge_only {
        let groups = merge_tree(&cli.output, &config).context("Merge failed")?;
        if cli.json {
            let dirs: Vec<String> = groups
                .iter()
                .map(|g| g.directory.display().to_string())
                .collect();
            println!("{}", serde_json::to_string_pretty(&dirs)?);
        } else if !cli.quiet {
            for group in &groups {
                eprintln!(
                    "{} {}  {}",
                    green("✓"),
                    group.merged_path.display(),
                    dim(&format!("{} files", group.member_files.len())),
                );
            }
            eprintln!("{} {} directories merged", green("✔"), groups.len());
        }
        return Ok(());
    }

    // ── Build recognizer ─────────────────────────────────────────────────
    let endpoint = cli.endpoint.clone().context(
        "No OCR endpoint configured.\nPass --endpoint or set OCR_ENDPOINT.",
    )?;
    let api_key = std::env::var("OCR_API_KEY").ok().filter(|k| !k.is_empty());
    let recognizer: Arc<dyn Recognizer> = Arc::new(HttpRecognizer::new(endpoint, api_key)?);

    // ── Run ──────────────────────────────────────────────────────────────
    let output = run(&cli.input, &cli.output, recognizer, &config)
        .await
        .context("Run failed")?;

    // ── Merge ────────────────────────────────────────────────────────────
    let merged_dirs = if cli.no_merge {
        0
    } else {
        merge_tree(&cli.output, &config).context("Merge failed")?.len()
    };

    // ── Summary ──────────────────────────────────────────────────────────
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output.stats)?);
    } else if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} images  {:.0}% ok  {}ms total  {}ms/image",
            if stats.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.succeeded,
            stats.total_items,
            stats.success_rate * 100.0,
            stats.total_duration_ms,
            stats.avg_item_ms,
        );
        if let Some(adjustments) = stats.adjustment_count {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} batches, {} rate adjustments, final {} items / {}ms pause",
                    stats.batches, adjustments, stats.final_batch_size, stats.final_batch_delay_ms
                )),
            );
        }
        if !cli.no_merge {
            eprintln!("   {}", dim(&format!("{merged_dirs} directories merged")));
        }
        if stats.failed > 0 {
            if let Some(ref log) = config.error_log {
                eprintln!(
                    "   {} failures recorded in {}",
                    red(&stats.failed.to_string()),
                    log.display()
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `OcrConfig`.
fn build_config(cli: &Cli) -> Result<OcrConfig> {
    let batch_size = cli.batch_size.max(1);
    let rate = RateConfig {
        initial_batch_size: batch_size,
        initial_batch_delay_ms: cli.batch_delay_ms,
        // Widen the bounds if the caller pinned an initial value outside them.
        max_batch_size: RateConfig::default().max_batch_size.max(batch_size),
        max_batch_delay_ms: RateConfig::default()
            .max_batch_delay_ms
            .max(cli.batch_delay_ms),
        min_batch_delay_ms: RateConfig::default()
            .min_batch_delay_ms
            .min(cli.batch_delay_ms),
        ..RateConfig::default()
    };

    let mut builder = OcrConfig::builder()
        .extensions(cli.extensions.split(',').map(|e| e.trim().to_string()))
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .adaptive(!cli.no_adaptive)
        .rate(rate)
        .encoding(cli.encoding.clone().into())
        .error_log(
            cli.error_log
                .clone()
                .unwrap_or_else(|| cli.output.join("ocr_errors.log")),
        );

    if let Some(limit) = cli.limit {
        builder = builder.limit(limit);
    }

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.merge_only;
    if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        builder = builder.progress_callback(cb as ProgressCallback);
    }

    builder.build().context("Invalid configuration")
}
