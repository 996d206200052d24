//! Engine error types.

use bulkhead::BulkheadError;
use common::{InvalidBoundaryPair, InvalidPartitionRange};
use thiserror::Error;
use transfer_store::{SequenceError, TransferStoreError};

use crate::outbox::BrokerError;
use crate::reconcile::DispatchError;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transfer store error. Transient for sweeps: the current cycle aborts
    /// and the next one retries.
    #[error("transfer store error: {0}")]
    Store(#[from] TransferStoreError),

    /// Sequence allocator error. Transient: the ingestion path fails fast
    /// and no id is fabricated.
    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// Broker error.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Downstream task dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Bulkhead error.
    #[error("bulkhead error: {0}")]
    Bulkhead(#[from] BulkheadError),

    /// Invalid partition range bounds. Fatal configuration.
    #[error(transparent)]
    PartitionRange(#[from] InvalidPartitionRange),

    /// Invalid reconciliation boundary pair. Fatal configuration.
    #[error(transparent)]
    BoundaryPair(#[from] InvalidBoundaryPair),
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
