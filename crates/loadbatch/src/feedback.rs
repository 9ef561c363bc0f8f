//! Per-batch load feedback and the rolling window the controller reads.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const CPU_WEIGHT: f64 = 0.60;
const QUEUE_WEIGHT: f64 = 0.15;
const ERROR_WEIGHT: f64 = 0.15;
const LOCK_WEIGHT: f64 = 0.10;

/// Queue depth treated as full saturation of the queue channel.
const QUEUE_SATURATION: f64 = 100.0;
/// Lock count treated as full saturation of the contention channel.
const LOCK_SATURATION: f64 = 50.0;

/// Backend load metrics reported by a handler after processing one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadFeedback {
    /// CPU utilization as a fraction, 0.0 (idle) to 1.0 (saturated).
    pub cpu_load: f64,
    /// Items the backend itself still has queued.
    pub queue_depth: u64,
    /// Wall-clock time the backend spent on the batch.
    pub processing_time: Duration,
    /// Fraction of items in the batch that failed, 0.0 to 1.0.
    pub error_rate: f64,
    /// Observed database lock contentions.
    pub db_locks: u64,
    /// Free-form extra metrics. Informational only; never scored.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
}

impl LoadFeedback {
    /// Fuse the individual metrics into a single load score in [0, 1],
    /// where 0 is idle and 1 is overloaded.
    ///
    /// CPU carries 60% of the weight as the most immediate saturation
    /// signal. Queue depth (15%) and lock contention (10%) are normalized
    /// against their high-water marks of 100 and 50. The error rate (15%)
    /// surfaces overload the handler itself observed. The weights are fixed
    /// so the scalar reads the same across deployments.
    pub fn load_score(&self) -> f64 {
        let cpu = self.cpu_load.clamp(0.0, 1.0);
        let queue = (self.queue_depth as f64 / QUEUE_SATURATION).min(1.0);
        let errors = self.error_rate.clamp(0.0, 1.0);
        let locks = (self.db_locks as f64 / LOCK_SATURATION).min(1.0);

        let score =
            cpu * CPU_WEIGHT + queue * QUEUE_WEIGHT + errors * ERROR_WEIGHT + locks * LOCK_WEIGHT;
        score.min(1.0)
    }
}

/// Bounded FIFO of the most recent feedback records.
#[derive(Debug)]
pub(crate) struct FeedbackWindow {
    samples: VecDeque<LoadFeedback>,
    capacity: usize,
}

impl FeedbackWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the eldest once over capacity.
    pub(crate) fn record(&mut self, feedback: LoadFeedback) {
        self.samples.push_back(feedback);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the load scores currently held, or 0 when empty.
    pub(crate) fn average_score(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(LoadFeedback::load_score).sum();
        total / self.samples.len() as f64
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(cpu: f64, queue: u64, errors: f64, locks: u64) -> LoadFeedback {
        LoadFeedback {
            cpu_load: cpu,
            queue_depth: queue,
            error_rate: errors,
            db_locks: locks,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_score_ranges() {
        let cases = [
            ("low", feedback(0.1, 5, 0.0, 2), 0.0, 0.3),
            ("medium", feedback(0.5, 50, 0.05, 20), 0.3, 0.7),
            ("high", feedback(0.9, 150, 0.2, 60), 0.7, 1.0),
        ];
        for (name, fb, min, max) in cases {
            let score = fb.load_score();
            assert!(
                score >= min && score <= max,
                "{name}: score {score} not in [{min}, {max}]"
            );
        }
    }

    #[test]
    fn test_load_score_stays_in_unit_interval() {
        let extremes = [
            feedback(0.0, 0, 0.0, 0),
            feedback(1.0, u64::MAX, 1.0, u64::MAX),
            feedback(50.0, 10_000, 7.0, 9_000),
            feedback(-3.0, 0, -1.0, 0),
        ];
        for fb in extremes {
            let score = fb.load_score();
            assert!((0.0..=1.0).contains(&score), "score {score} out of bounds");
        }
    }

    #[test]
    fn test_load_score_clamps_fraction_inputs() {
        // cpu_load above 1.0 must not contribute more than a saturated CPU.
        let over = feedback(5.0, 0, 0.0, 0);
        let saturated = feedback(1.0, 0, 0.0, 0);
        assert_eq!(over.load_score(), saturated.load_score());
    }

    #[test]
    fn test_window_evicts_eldest() {
        let mut window = FeedbackWindow::new(3);
        for cpu in [0.1, 0.2, 0.3, 0.4] {
            window.record(feedback(cpu, 0, 0.0, 0));
        }
        assert_eq!(window.len(), 3);
        // The 0.1 sample is gone; the mean reflects 0.2, 0.3, 0.4.
        let expected = (0.2 + 0.3 + 0.4) / 3.0 * 0.60;
        assert!((window.average_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_averages_to_zero() {
        let window = FeedbackWindow::new(10);
        assert!(window.is_empty());
        assert_eq!(window.average_score(), 0.0);
    }
}
