use thiserror::Error;

/// Boxed error carried by handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type BatchResult<T> = Result<T, BatcherError>;

#[derive(Error, Debug)]
pub enum BatcherError {
    /// Returned by `submit` once shutdown has begun.
    #[error("Batcher is closed")]
    Closed,

    /// Rejected at construction time; no batcher is created.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A handler failure, surfaced to the caller that triggered the flush.
    #[error("Batch handler error: {0}")]
    Handler(BoxError),
}
