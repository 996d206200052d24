use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Partition, PartitionRange, TransferKey};

use crate::{OrphanQuery, OutboxQuery, Result, RetryQuery, Transfer, TransferStatus};

/// Core trait for transfer store implementations.
///
/// The store is the durable record of transfers plus the partition-scoped
/// sweep queries the engine runs against it. All read operations are
/// side-effect-free; every batch query honors the caller-supplied `limit` as
/// a hard upper bound. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Inserts a new transfer.
    ///
    /// Fails with `DuplicateExternalId` if a transfer with the same external
    /// reference id already exists; callers treat that as re-ingestion of a
    /// known record and fetch the winner.
    async fn insert(&self, transfer: &Transfer) -> Result<()>;

    /// Loads a transfer by its composite identity.
    async fn load(&self, key: TransferKey) -> Result<Option<Transfer>>;

    /// Finds a transfer by external reference id, across all partitions.
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transfer>>;

    /// Finds a transfer by external reference id within a partition range.
    async fn find_by_external_id_in_range(
        &self,
        external_id: &str,
        range: PartitionRange,
    ) -> Result<Option<Transfer>>;

    /// Finds a transfer by external reference id within a single partition.
    async fn find_by_external_id_in_partition(
        &self,
        external_id: &str,
        partition: Partition,
    ) -> Result<Option<Transfer>>;

    /// Finds a transfer by its business lookup key within a partition.
    async fn find_by_suit(&self, suit: &str, partition: Partition) -> Result<Option<Transfer>>;

    /// Finds unpublished transfers created before the query threshold.
    ///
    /// Result order is unspecified; size never exceeds the query limit.
    async fn find_unpublished(&self, query: OutboxQuery) -> Result<Vec<TransferKey>>;

    /// Finds transfers in the given status whose next-retry time has
    /// elapsed.
    async fn find_due_for_retry(&self, query: RetryQuery) -> Result<Vec<TransferKey>>;

    /// Finds transfers that expect a downstream task but have no journal
    /// entry for it, across the query's boundary pair. See [`OrphanQuery`].
    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TransferKey>>;

    /// Marks a transfer as published to the broker.
    ///
    /// Idempotent and monotonic: the flag only ever advances to `true`, and
    /// there is no operation that reverts it.
    async fn mark_published(&self, key: TransferKey) -> Result<()>;

    /// Updates the status and next-retry timestamp of a transfer.
    async fn set_retry_state(
        &self,
        key: TransferKey,
        status: TransferStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Extension trait providing convenience methods for transfer stores.
#[async_trait]
pub trait TransferStoreExt: TransferStore {
    /// Checks whether a transfer with the given external reference id
    /// exists.
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        Ok(self.find_by_external_id(external_id).await?.is_some())
    }

    /// Loads a transfer and reports whether it has been published.
    ///
    /// Returns false for a missing record.
    async fn is_published(&self, key: TransferKey) -> Result<bool> {
        Ok(self.load(key).await?.is_some_and(|t| t.published))
    }
}

// Blanket implementation for all TransferStore implementations
impl<T: TransferStore + ?Sized> TransferStoreExt for T {}
