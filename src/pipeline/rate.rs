//! Adaptive rate controller: tunes batch size and inter-batch delay from
//! observed success rates.
//!
//! ## Why adaptive?
//!
//! The true rate limit of the recognition endpoint is unknown and drifts —
//! shared quotas, time-of-day load, silent policy changes. Rather than chase
//! exact compliance, the controller watches the trailing success rate of
//! completed batches and nudges the next batch's size and delay toward the
//! healthy band: a discrete, bounded integral controller. It converges
//! empirically without manual tuning and never escapes its configured bounds.
//!
//! The state is a plain value owned by the orchestrator and threaded through
//! explicitly — no globals — so the controller is unit-testable by feeding it
//! synthetic batch outcomes.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Number of trailing batch outcomes averaged per evaluation.
const WINDOW: usize = 3;

/// Tuning knobs for the rate controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Items per batch before any adjustment. Default: 10.
    pub initial_batch_size: usize,
    /// Lower bound on batch size. Default: 1.
    pub min_batch_size: usize,
    /// Upper bound on batch size. Default: 50.
    pub max_batch_size: usize,
    /// Pause between batches before any adjustment, in ms. Default: 2000.
    pub initial_batch_delay_ms: u64,
    /// Lower bound on the inter-batch delay, in ms. Default: 500.
    pub min_batch_delay_ms: u64,
    /// Upper bound on the inter-batch delay, in ms. Default: 30_000.
    pub max_batch_delay_ms: u64,
    /// Trailing average at or above which the controller scales up. Default: 0.95.
    pub scale_up_threshold: f64,
    /// Trailing average at or below which the controller scales down. Default: 0.80.
    pub scale_down_threshold: f64,
    /// Multiplier applied on scale-up, divisor on scale-down. Default: 1.5.
    pub scaling_factor: f64,
    /// Evaluate an adjustment only every N recorded batches. Default: 5.
    ///
    /// The guard keeps one noisy batch from whipsawing the parameters; set
    /// to 1 for rolling evaluation directly after every batch.
    pub adjustment_interval: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 10,
            min_batch_size: 1,
            max_batch_size: 50,
            initial_batch_delay_ms: 2000,
            min_batch_delay_ms: 500,
            max_batch_delay_ms: 30_000,
            scale_up_threshold: 0.95,
            scale_down_threshold: 0.80,
            scaling_factor: 1.5,
            adjustment_interval: 5,
        }
    }
}

impl RateConfig {
    /// Validate internal consistency; called from `OcrConfigBuilder::build`.
    pub fn validate(&self) -> Result<(), OcrError> {
        if self.min_batch_size == 0 {
            return Err(OcrError::InvalidConfig("min_batch_size must be ≥ 1".into()));
        }
        if !(self.min_batch_size <= self.initial_batch_size
            && self.initial_batch_size <= self.max_batch_size)
        {
            return Err(OcrError::InvalidConfig(format!(
                "batch size bounds must satisfy min ≤ initial ≤ max, got {} ≤ {} ≤ {}",
                self.min_batch_size, self.initial_batch_size, self.max_batch_size
            )));
        }
        if !(self.min_batch_delay_ms <= self.initial_batch_delay_ms
            && self.initial_batch_delay_ms <= self.max_batch_delay_ms)
        {
            return Err(OcrError::InvalidConfig(format!(
                "batch delay bounds must satisfy min ≤ initial ≤ max, got {} ≤ {} ≤ {}",
                self.min_batch_delay_ms, self.initial_batch_delay_ms, self.max_batch_delay_ms
            )));
        }
        if self.scaling_factor <= 1.0 {
            return Err(OcrError::InvalidConfig(
                "scaling_factor must be > 1.0".into(),
            ));
        }
        if !(0.0 < self.scale_down_threshold
            && self.scale_down_threshold < self.scale_up_threshold
            && self.scale_up_threshold <= 1.0)
        {
            return Err(OcrError::InvalidConfig(format!(
                "thresholds must satisfy 0 < down < up ≤ 1, got down={} up={}",
                self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        if self.adjustment_interval == 0 {
            return Err(OcrError::InvalidConfig(
                "adjustment_interval must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// One completed batch as the controller saw it. Append-only, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 1-indexed batch number within the run.
    pub batch_number: usize,
    /// Fraction of items in the batch that succeeded, 0.0–1.0.
    pub success_rate: f64,
    /// Batch size in effect when the batch ran.
    pub batch_size: usize,
    /// Inter-batch delay in effect when the batch ran, in ms.
    pub batch_delay_ms: u64,
}

/// Mutable controller state for one run.
///
/// Exactly one writer (the orchestrator, between batches); nothing reads it
/// concurrently, so it needs no synchronisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateState {
    batch_size: usize,
    batch_delay_ms: u64,
    history: Vec<BatchOutcome>,
    adjustment_count: u32,
}

impl RateState {
    /// Fresh state for a new run, seeded from the config's initial values.
    pub fn new(config: &RateConfig) -> Self {
        Self {
            batch_size: config.initial_batch_size,
            batch_delay_ms: config.initial_batch_delay_ms,
            history: Vec::new(),
            adjustment_count: 0,
        }
    }

    /// Size the next batch should use.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Delay to sleep before the next batch.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Delay in milliseconds (for summaries).
    pub fn batch_delay_ms(&self) -> u64 {
        self.batch_delay_ms
    }

    /// How many adjustments actually changed a value so far.
    pub fn adjustment_count(&self) -> u32 {
        self.adjustment_count
    }

    /// All recorded outcomes, oldest first.
    pub fn history(&self) -> &[BatchOutcome] {
        &self.history
    }

    /// Record a completed batch and, on the configured cadence, adjust the
    /// next batch's parameters from the trailing success-rate average.
    ///
    /// Rounding happens before clamping on every adjustment, so the values
    /// can never escape `[min, max]` no matter how many batches run.
    pub fn observe(&mut self, success_rate: f64, config: &RateConfig) {
        self.history.push(BatchOutcome {
            batch_number: self.history.len() + 1,
            success_rate,
            batch_size: self.batch_size,
            batch_delay_ms: self.batch_delay_ms,
        });

        if self.history.len() % config.adjustment_interval != 0 {
            return;
        }

        let window = &self.history[self.history.len().saturating_sub(WINDOW)..];
        let avg: f64 =
            window.iter().map(|o| o.success_rate).sum::<f64>() / window.len() as f64;

        let (old_size, old_delay) = (self.batch_size, self.batch_delay_ms);

        if avg >= config.scale_up_threshold {
            self.batch_size = round_clamp_usize(
                self.batch_size as f64 * config.scaling_factor,
                config.min_batch_size,
                config.max_batch_size,
            );
            self.batch_delay_ms = round_clamp_u64(
                self.batch_delay_ms as f64 / config.scaling_factor,
                config.min_batch_delay_ms,
                config.max_batch_delay_ms,
            );
        } else if avg <= config.scale_down_threshold {
            self.batch_size = round_clamp_usize(
                self.batch_size as f64 / config.scaling_factor,
                config.min_batch_size,
                config.max_batch_size,
            );
            self.batch_delay_ms = round_clamp_u64(
                self.batch_delay_ms as f64 * config.scaling_factor,
                config.min_batch_delay_ms,
                config.max_batch_delay_ms,
            );
        } else {
            debug!(
                avg_success = avg,
                batch_size = self.batch_size,
                "success rate in healthy band, parameters unchanged"
            );
            return;
        }

        if self.batch_size != old_size || self.batch_delay_ms != old_delay {
            self.adjustment_count += 1;
            info!(
                avg_success = avg,
                batch_size = self.batch_size,
                batch_delay_ms = self.batch_delay_ms,
                "rate controller adjusted batch parameters"
            );
        }
    }
}

fn round_clamp_usize(value: f64, min: usize, max: usize) -> usize {
    (value.round() as usize).clamp(min, max)
}

fn round_clamp_u64(value: f64, min: u64, max: u64) -> u64 {
    (value.round() as u64).clamp(min, max)
}
