use thiserror::Error;

use crate::transfer::UnknownStatus;

/// Errors that can occur when interacting with the transfer store.
#[derive(Debug, Error)]
pub enum TransferStoreError {
    /// A database error occurred. Transient: the sweep aborts for the
    /// current cycle and is retried on the next one.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An insert collided with an existing external reference id.
    /// Signals re-ingestion of a known transfer, not data corruption.
    #[error("duplicate external reference id: {0}")]
    DuplicateExternalId(String),

    /// A stored status value is outside the closed status set.
    /// Fatal: schema mismatch, surfaced to operators rather than retried.
    #[error(transparent)]
    Status(#[from] UnknownStatus),
}

/// Result type for transfer store operations.
pub type Result<T> = std::result::Result<T, TransferStoreError>;
