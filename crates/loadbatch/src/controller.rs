//! Adaptive batch-size controller.
//!
//! A background thread wakes on a fixed interval, averages the feedback
//! window, and applies a three-band policy: grow while the backend is
//! clearly idle, hold inside the dead band, shrink once load passes the
//! middle of the range. The asymmetric thresholds bias toward caution and
//! the dead band keeps mild noise from causing oscillation. Steps are a
//! fraction of the current size so reaction time scales with the regime,
//! with a floor of one so progress never stalls near the minimum.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Average load below which the backend counts as under-loaded.
pub(crate) const GROW_BELOW: f64 = 0.25;
/// Average load above which the backend counts as over-loaded.
pub(crate) const SHRINK_ABOVE: f64 = 0.55;

/// One adjustment step of the three-band policy, clamped into
/// `[min_size, max_size]`.
pub(crate) fn next_batch_size(
    current: usize,
    avg_load: f64,
    factor: f64,
    min_size: usize,
    max_size: usize,
) -> usize {
    let step = ((current as f64 * factor).floor() as usize).max(1);
    let target = if avg_load < GROW_BELOW {
        current.saturating_add(step)
    } else if avg_load > SHRINK_ABOVE {
        current.saturating_sub(step)
    } else {
        current
    };
    target.clamp(min_size, max_size)
}

/// Latch that wakes the controller out of its interval sleep on shutdown.
pub(crate) struct ShutdownSignal {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn trigger(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.signal.notify_all();
    }

    /// Sleep up to `period`. Returns true once shutdown has been requested.
    pub(crate) fn wait_for(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        self.signal.wait_for(&mut stopped, period);
        *stopped
    }
}

/// Spawn the controller thread. `step` runs once per interval and returns
/// false when the batcher it serves is gone.
pub(crate) fn spawn<S>(
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
    mut step: S,
) -> thread::JoinHandle<()>
where
    S: FnMut() -> bool + Send + 'static,
{
    thread::Builder::new()
        .name("loadbatch-controller".to_string())
        .spawn(move || {
            while !shutdown.wait_for(interval) {
                if !step() {
                    break;
                }
            }
            debug!("batch size controller stopped");
        })
        .expect("failed to spawn controller thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_band_holds_size() {
        for avg in [0.25, 0.35, 0.45, 0.55] {
            assert_eq!(next_batch_size(40, avg, 0.2, 1, 1000), 40, "avg {avg}");
        }
    }

    #[test]
    fn test_grows_when_underloaded() {
        assert_eq!(next_batch_size(40, 0.1, 0.2, 1, 1000), 48);
        // Step floors at one even when the fraction rounds to zero.
        assert_eq!(next_batch_size(3, 0.0, 0.2, 1, 1000), 4);
    }

    #[test]
    fn test_shrinks_when_overloaded() {
        assert_eq!(next_batch_size(40, 0.9, 0.2, 1, 1000), 32);
        assert_eq!(next_batch_size(3, 0.9, 0.2, 1, 1000), 2);
    }

    #[test]
    fn test_clamps_to_bounds() {
        assert_eq!(next_batch_size(995, 0.0, 0.2, 1, 1000), 1000);
        assert_eq!(next_batch_size(6, 0.9, 0.5, 5, 1000), 5);
        // A full-factor shrink from the minimum stays at the minimum.
        assert_eq!(next_batch_size(5, 1.0, 1.0, 5, 1000), 5);
    }

    #[test]
    fn test_converges_monotonically_to_min() {
        let (factor, min, max) = (0.2, 1usize, 1000usize);
        let mut size = 1000usize;
        let mut ticks = 0;
        while size > min {
            let next = next_batch_size(size, 0.9, factor, min, max);
            assert!(next < size, "must shrink every tick while overloaded");
            size = next;
            ticks += 1;
            assert!(ticks < 100, "failed to converge");
        }
        // Multiplicative decay reaches the floor in roughly
        // log(initial/min) / log(1/(1-factor)) ticks plus a short tail of
        // single-step moves.
        assert!(ticks <= 50, "took {ticks} ticks");
    }

    #[test]
    fn test_converges_monotonically_to_max() {
        let (factor, min, max) = (0.5, 5usize, 50usize);
        let mut size = 5usize;
        let mut ticks = 0;
        while size < max {
            let next = next_batch_size(size, 0.0, factor, min, max);
            assert!(next > size, "must grow every tick while idle");
            size = next;
            ticks += 1;
            assert!(ticks < 100, "failed to converge");
        }
        assert!(ticks <= 10, "took {ticks} ticks");
    }

    #[test]
    fn test_shutdown_signal_wakes_waiter() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || waiter.wait_for(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(handle.join().unwrap());
    }
}
