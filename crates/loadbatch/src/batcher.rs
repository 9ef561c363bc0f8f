//! Load-aware batching accumulator.
//!
//! Items submitted by any number of producer threads accumulate in a
//! pending buffer behind a single mutex. A flush detaches the buffer and
//! runs the handler outside the lock, so a slow backend never stalls
//! admission. The handler's load feedback feeds the background controller,
//! which moves the size trigger between the configured bounds.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::config::BatcherConfig;
use crate::controller::{self, ShutdownSignal};
use crate::error::{BatchResult, BatcherError};
use crate::feedback::FeedbackWindow;
use crate::handler::BatchHandler;
use crate::timer::FlushTimer;

/// Point-in-time view of a batcher, for dashboards and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatcherStats {
    /// The size trigger currently in force.
    pub current_batch_size: usize,
    /// Items admitted but not yet detached.
    pub pending_items: usize,
    /// Mean load score over the feedback window, 0 when no feedback yet.
    pub average_load_score: f64,
    /// Number of feedback records currently in the window.
    pub feedback_samples: usize,
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Size,
    Timeout,
    Manual,
    Close,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timeout => "timeout",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Close => "close",
        }
    }
}

/// Everything the accumulator mutates, behind the one lock.
struct State<T> {
    pending: Vec<T>,
    current_size: usize,
    timer_armed: bool,
    closed: bool,
    window: FeedbackWindow,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    config: BatcherConfig,
    handler: Arc<dyn BatchHandler<T>>,
    timer: Option<FlushTimer>,
    shutdown: Arc<ShutdownSignal>,
    controller: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Thread-safe batching accumulator with adaptive sizing.
///
/// Cloning is cheap and yields another handle onto the same accumulator, so
/// producers can each hold their own.
pub struct Batcher<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Batcher<T> {
    /// Create a batcher and start its background controller.
    ///
    /// The configuration is validated and normalized first (see
    /// [`BatcherConfig`]); an unusable config fails with
    /// [`BatcherError::InvalidConfig`] and nothing is started. When a
    /// timeout is configured the flush timer thread starts here as well.
    pub fn new(config: BatcherConfig, handler: Arc<dyn BatchHandler<T>>) -> BatchResult<Self> {
        let config = config.validated()?;
        let shutdown = Arc::new(ShutdownSignal::new());

        let shared = Arc::new_cyclic(|weak: &Weak<Shared<T>>| {
            let timer = if config.timeout.is_zero() {
                None
            } else {
                let weak = weak.clone();
                Some(FlushTimer::spawn(config.timeout, move || {
                    if let Some(shared) = weak.upgrade() {
                        timeout_flush(&shared);
                    }
                }))
            };
            Shared {
                state: Mutex::new(State {
                    pending: Vec::with_capacity(config.initial_batch_size),
                    current_size: config.initial_batch_size,
                    timer_armed: false,
                    closed: false,
                    window: FeedbackWindow::new(config.feedback_window),
                }),
                config,
                handler,
                timer,
                shutdown: Arc::clone(&shutdown),
                controller: Mutex::new(None),
            }
        });

        let weak = Arc::downgrade(&shared);
        let handle = controller::spawn(
            shared.config.load_check_interval,
            shutdown,
            move || match weak.upgrade() {
                Some(shared) => {
                    adjust_batch_size(&shared);
                    true
                }
                None => false,
            },
        );
        *shared.controller.lock() = Some(handle);

        debug!(
            initial_size = shared.config.initial_batch_size,
            min_size = shared.config.min_batch_size,
            max_size = shared.config.max_batch_size,
            "batcher started"
        );
        Ok(Self { shared })
    }

    /// Submit one item.
    ///
    /// When this item fills the pending buffer to the current size trigger,
    /// the buffer is detached and the handler runs synchronously on this
    /// thread; its error, if any, is returned here. Otherwise the first
    /// item into an empty buffer arms the flush timer, when a timeout is
    /// configured. Fails with [`BatcherError::Closed`] once shutdown has
    /// begun.
    pub fn submit(&self, item: T) -> BatchResult<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(BatcherError::Closed);
        }

        let was_empty = state.pending.is_empty();
        state.pending.push(item);

        if state.pending.len() >= state.current_size {
            let batch = detach(&mut state);
            disarm_timer(&self.shared, &mut state);
            drop(state);
            return run_flush(&self.shared, batch, FlushTrigger::Size);
        }

        if was_empty && !state.timer_armed {
            if let Some(timer) = &self.shared.timer {
                timer.arm();
                state.timer_armed = true;
            }
        }

        Ok(())
    }

    /// Flush whatever is pending. A no-op when the buffer is empty.
    pub fn flush(&self) -> BatchResult<()> {
        flush_shared(&self.shared, FlushTrigger::Manual)
    }

    /// Close the batcher: stop the controller and timer, flush the
    /// remainder, and reject further submissions.
    ///
    /// Idempotent; second and later calls return `Ok` without touching the
    /// handler. The final flush's error, if any, is returned.
    pub fn close(&self) -> BatchResult<()> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        self.shared.shutdown.trigger();
        if let Some(handle) = self.shared.controller.lock().take() {
            if handle.join().is_err() {
                error!("batch size controller thread panicked");
            }
        }
        if let Some(timer) = &self.shared.timer {
            timer.shutdown();
        }

        info!("batcher closing, draining remainder");
        flush_shared(&self.shared, FlushTrigger::Close)
    }

    /// The size trigger currently in force.
    pub fn current_batch_size(&self) -> usize {
        self.shared.state.lock().current_size
    }

    /// Consistent snapshot of the batcher's observable state.
    pub fn stats(&self) -> BatcherStats {
        let state = self.shared.state.lock();
        BatcherStats {
            current_batch_size: state.current_size,
            pending_items: state.pending.len(),
            average_load_score: state.window.average_score(),
            feedback_samples: state.window.len(),
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Reached without close() only when every handle was dropped; the
        // background threads still have to be told to exit. Pending items
        // are not flushed here.
        self.shutdown.trigger();
        if let Some(timer) = &self.timer {
            timer.signal_shutdown();
        }
    }
}

/// Steal the pending buffer, leaving a fresh one preallocated for the
/// current size regime.
fn detach<T>(state: &mut State<T>) -> Vec<T> {
    std::mem::replace(&mut state.pending, Vec::with_capacity(state.current_size))
}

fn disarm_timer<T>(shared: &Shared<T>, state: &mut State<T>) {
    if state.timer_armed {
        if let Some(timer) = &shared.timer {
            timer.disarm();
        }
        state.timer_armed = false;
    }
}

fn flush_shared<T: Send + 'static>(shared: &Shared<T>, trigger: FlushTrigger) -> BatchResult<()> {
    let mut state = shared.state.lock();
    if state.pending.is_empty() {
        return Ok(());
    }
    let batch = detach(&mut state);
    disarm_timer(shared, &mut state);
    drop(state);
    run_flush(shared, batch, trigger)
}

/// Hand a detached batch to the handler and absorb its feedback. Runs
/// without the state lock; only feedback recording re-acquires it.
fn run_flush<T: Send + 'static>(
    shared: &Shared<T>,
    batch: Vec<T>,
    trigger: FlushTrigger,
) -> BatchResult<()> {
    let batch_len = batch.len();
    debug!(batch_len, trigger = trigger.as_str(), "flushing batch");

    let outcome = shared.handler.handle(batch);

    metrics::counter!("batcher.flushes").increment(1);
    metrics::counter!("batcher.items_flushed").increment(batch_len as u64);

    if let Some(feedback) = outcome.feedback {
        shared.state.lock().window.record(feedback);
    }

    match outcome.result {
        Ok(()) => Ok(()),
        Err(err) => {
            metrics::counter!("batcher.handler_errors").increment(1);
            Err(BatcherError::Handler(err))
        }
    }
}

/// Timer-fired flush. There is no caller to report to, so handler errors
/// are logged and swallowed.
fn timeout_flush<T: Send + 'static>(shared: &Shared<T>) {
    if let Err(err) = flush_shared(shared, FlushTrigger::Timeout) {
        warn!(error = %err, "timeout flush failed");
    }
}

/// One controller tick: average the window and move the size trigger.
fn adjust_batch_size<T: Send + 'static>(shared: &Shared<T>) {
    let mut state = shared.state.lock();
    if state.window.is_empty() {
        // No evidence to act on.
        return;
    }

    let avg_load = state.window.average_score();
    let new_size = controller::next_batch_size(
        state.current_size,
        avg_load,
        shared.config.adjustment_factor,
        shared.config.min_batch_size,
        shared.config.max_batch_size,
    );

    if new_size != state.current_size {
        info!(
            old_size = state.current_size,
            new_size, avg_load, "adjusting batch size"
        );
        metrics::gauge!("batcher.batch_size").set(new_size as f64);
        state.current_size = new_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CountingHandler;

    #[test]
    fn test_initial_size_visible_after_construction() {
        let batcher: Batcher<u32> = Batcher::new(
            BatcherConfig {
                initial_batch_size: 5000,
                ..Default::default()
            },
            Arc::new(CountingHandler::new()),
        )
        .unwrap();
        // Clamped to the default ceiling.
        assert_eq!(batcher.current_batch_size(), 1000);
        batcher.close().unwrap();
    }

    #[test]
    fn test_stats_start_empty() {
        let batcher: Batcher<u32> = Batcher::new(
            BatcherConfig {
                initial_batch_size: 10,
                ..Default::default()
            },
            Arc::new(CountingHandler::new()),
        )
        .unwrap();
        assert_eq!(
            batcher.stats(),
            BatcherStats {
                current_batch_size: 10,
                pending_items: 0,
                average_load_score: 0.0,
                feedback_samples: 0,
            }
        );
        batcher.close().unwrap();
    }
}
