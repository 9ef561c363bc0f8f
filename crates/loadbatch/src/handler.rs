//! Handler seam: the user-supplied consumer every detached batch is fed to.
//!
//! Modules embed a batcher with an `Arc<dyn BatchHandler<T>>`, the same way
//! other backends are plugged in behind trait objects. The no-op and
//! counting implementations below exist for tests and wiring stubs.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BoxError;
use crate::feedback::LoadFeedback;

/// What a handler reports back after consuming one batch.
///
/// Feedback and failure travel side by side: a handler that failed part of
/// a batch can still report the pressure it observed. The batcher records
/// the feedback either way and surfaces the error to whoever triggered the
/// flush.
#[derive(Debug)]
pub struct BatchOutcome {
    pub(crate) feedback: Option<LoadFeedback>,
    pub(crate) result: Result<(), BoxError>,
}

impl BatchOutcome {
    /// Successful processing with nothing to report.
    pub fn success() -> Self {
        Self {
            feedback: None,
            result: Ok(()),
        }
    }

    /// Failed processing. The error reaches the caller that triggered the
    /// flush; timeout-triggered flushes log it instead.
    pub fn failure(err: impl Into<BoxError>) -> Self {
        Self {
            feedback: None,
            result: Err(err.into()),
        }
    }

    /// Attach a load feedback record to this outcome.
    pub fn with_feedback(mut self, feedback: LoadFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }
}

/// A consumer of detached batches.
///
/// The handler runs on the producer thread that triggered the flush, or on
/// the timer thread for timeout flushes, and always outside the batcher's
/// lock, so it may be slow without stalling admission. It receives the batch
/// by value and owns the items from that point on. It must not call back
/// into the same batcher synchronously; a size-triggered flush would then
/// wait on itself.
pub trait BatchHandler<T>: Send + Sync {
    fn handle(&self, batch: Vec<T>) -> BatchOutcome;
}

impl<T, F> BatchHandler<T> for F
where
    F: Fn(Vec<T>) -> BatchOutcome + Send + Sync,
{
    fn handle(&self, batch: Vec<T>) -> BatchOutcome {
        self(batch)
    }
}

/// Handler that drops every batch. For tests and wiring stubs.
#[derive(Debug, Default)]
pub struct NoopHandler;

impl<T> BatchHandler<T> for NoopHandler {
    fn handle(&self, _batch: Vec<T>) -> BatchOutcome {
        BatchOutcome::success()
    }
}

/// Handler that counts batches and items, optionally replying with a canned
/// feedback record. For tests.
#[derive(Debug, Default)]
pub struct CountingHandler {
    items: AtomicU64,
    batches: AtomicU64,
    canned: Option<LoadFeedback>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counting handler that returns `feedback` for every batch.
    pub fn with_feedback(feedback: LoadFeedback) -> Self {
        Self {
            canned: Some(feedback),
            ..Self::default()
        }
    }

    /// Total items seen across all batches.
    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Relaxed)
    }

    /// Number of handler invocations.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl<T> BatchHandler<T> for CountingHandler {
    fn handle(&self, batch: Vec<T>) -> BatchOutcome {
        self.items.fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        match &self.canned {
            Some(feedback) => BatchOutcome::success().with_feedback(feedback.clone()),
            None => BatchOutcome::success(),
        }
    }
}
