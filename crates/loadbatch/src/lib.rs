//! Load-aware batching with closed-loop batch size control.
//!
//! Producers submit individual items; the batcher groups them into batches
//! and hands each batch to a user-supplied [`BatchHandler`]. The handler
//! reports backend pressure as [`LoadFeedback`], and a background controller
//! steers the batch size toward the regime the backend can sustain.

pub mod batcher;
pub mod config;
pub mod error;
pub mod feedback;
pub mod handler;

mod controller;
mod timer;

pub use batcher::{Batcher, BatcherStats};
pub use config::BatcherConfig;
pub use error::{BatchResult, BatcherError, BoxError};
pub use feedback::LoadFeedback;
pub use handler::{BatchHandler, BatchOutcome, CountingHandler, NoopHandler};
