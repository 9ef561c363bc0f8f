//! Batcher configuration: defaults and construction-time validation.

use crate::error::{BatchResult, BatcherError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_INITIAL_BATCH_SIZE: usize = 100;
const DEFAULT_MIN_BATCH_SIZE: usize = 1;
const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
const DEFAULT_ADJUSTMENT_FACTOR: f64 = 0.2;
const DEFAULT_LOAD_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_FEEDBACK_WINDOW: usize = 10;

/// Tuning knobs for a [`Batcher`](crate::Batcher). Immutable once the
/// batcher is constructed.
///
/// Zero-valued fields mean "unset" and are replaced with defaults during
/// validation, so partial configs can lean on `..Default::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Batch size in force before any load feedback has arrived. Clamped
    /// into `[min_batch_size, max_batch_size]`; zero is rejected.
    pub initial_batch_size: usize,
    /// Floor for the adaptive batch size.
    pub min_batch_size: usize,
    /// Ceiling for the adaptive batch size.
    pub max_batch_size: usize,
    /// How long the oldest pending item may wait before a flush is forced.
    /// Zero disables the time trigger; only size-based flushing remains.
    pub timeout: Duration,
    /// Fraction of the current size each controller step moves by, in
    /// (0, 1]. Higher values react faster.
    pub adjustment_factor: f64,
    /// How often the controller re-evaluates the batch size.
    pub load_check_interval: Duration,
    /// Number of recent feedback records the controller averages over.
    pub feedback_window: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: DEFAULT_INITIAL_BATCH_SIZE,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout: Duration::ZERO,
            adjustment_factor: DEFAULT_ADJUSTMENT_FACTOR,
            load_check_interval: DEFAULT_LOAD_CHECK_INTERVAL,
            feedback_window: DEFAULT_FEEDBACK_WINDOW,
        }
    }
}

impl BatcherConfig {
    /// Validate and normalize. Unset fields pick up defaults, the initial
    /// size is clamped into the min/max range, and unusable values are
    /// rejected with [`BatcherError::InvalidConfig`].
    pub(crate) fn validated(mut self) -> BatchResult<Self> {
        if self.initial_batch_size == 0 {
            return Err(BatcherError::InvalidConfig(
                "initial batch size must be positive",
            ));
        }
        if self.min_batch_size == 0 {
            self.min_batch_size = DEFAULT_MIN_BATCH_SIZE;
        }
        if self.max_batch_size == 0 {
            self.max_batch_size = DEFAULT_MAX_BATCH_SIZE;
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(BatcherError::InvalidConfig(
                "min batch size exceeds max batch size",
            ));
        }
        self.initial_batch_size = self
            .initial_batch_size
            .clamp(self.min_batch_size, self.max_batch_size);

        // NaN and non-positive factors fall back to the default; anything
        // above 1.0 is capped there.
        if !(self.adjustment_factor > 0.0) {
            self.adjustment_factor = DEFAULT_ADJUSTMENT_FACTOR;
        } else if self.adjustment_factor > 1.0 {
            self.adjustment_factor = 1.0;
        }
        if self.load_check_interval.is_zero() {
            self.load_check_interval = DEFAULT_LOAD_CHECK_INTERVAL;
        }
        if self.feedback_window == 0 {
            self.feedback_window = DEFAULT_FEEDBACK_WINDOW;
        }
        Ok(self)
    }
}
