use thiserror::Error;

/// Errors that can occur when submitting work to the bulkhead.
#[derive(Debug, Error)]
pub enum BulkheadError {
    /// The configured worker cap is zero. Fatal configuration, surfaced at
    /// startup rather than retried.
    #[error("bulkhead worker cap must be positive")]
    InvalidWorkerCap,

    /// The bulkhead has been shut down; no further work is admitted.
    #[error("bulkhead is shut down")]
    ShutDown,

    /// A submitted operation panicked on the worker pool.
    #[error("bulkhead worker panicked: {0}")]
    WorkerPanic(String),
}
