//! One-shot flush timer backed by a dedicated thread.
//!
//! The accumulator needs exactly two behaviors from its timer:
//! cancel-before-fire and safe re-arm. A single long-lived thread parked on
//! a condvar provides both; arming replaces the deadline, disarming clears
//! it. The fire callback runs with no timer state held, so it is free to
//! take the batcher lock.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

pub(crate) struct FlushTimer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    timeout: Duration,
}

impl FlushTimer {
    /// Spawn the timer thread. `on_fire` runs once per arming, `timeout`
    /// after the arm, unless disarmed first.
    pub(crate) fn spawn<F>(timeout: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            signal: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("loadbatch-timer".to_string())
            .spawn(move || run(thread_shared, on_fire))
            .expect("failed to spawn timer thread");
        Self {
            shared,
            thread: Mutex::new(Some(handle)),
            timeout,
        }
    }

    /// Schedule a fire `timeout` from now, replacing any pending deadline.
    pub(crate) fn arm(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.deadline = Some(Instant::now() + self.timeout);
        self.shared.signal.notify_one();
    }

    /// Cancel the pending fire, if any.
    pub(crate) fn disarm(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        self.shared.signal.notify_one();
    }

    /// Ask the timer thread to exit without waiting for it.
    pub(crate) fn signal_shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.signal.notify_one();
    }

    /// Stop the timer thread and wait for it to exit.
    pub(crate) fn shutdown(&self) {
        self.signal_shutdown();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // A fire in flight can end up dropping the owning batcher on
            // this very thread; joining ourselves would never return.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run<F: Fn()>(shared: Arc<TimerShared>, on_fire: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => {
                shared.signal.wait(&mut state);
            }
            Some(deadline) => {
                if Instant::now() >= deadline {
                    // Commit to this fire before releasing the lock; a
                    // concurrent disarm now arrives too late, and the
                    // callback must tolerate finding nothing to flush.
                    state.deadline = None;
                    drop(state);
                    on_fire();
                    state = shared.state.lock();
                } else {
                    shared.signal.wait_until(&mut state, deadline);
                }
            }
        }
    }
}
