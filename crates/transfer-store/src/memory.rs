use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Partition, PartitionRange, TaskType, TransferId, TransferKey};
use tokio::sync::RwLock;

use crate::{
    OrphanQuery, OutboxQuery, RecordOutcome, Result, RetryQuery, TaskJournal, Transfer,
    TransferStatus, TransferStoreError,
    store::TransferStore,
};

/// In-memory transfer store implementation for testing.
///
/// Holds both the transfer table and the task journal, exactly like the
/// durable schema, so the orphan anti-join can be evaluated against both.
/// Transfers iterate in `(partition, id)` order, which makes batch-limited
/// results deterministic in tests; callers still must not rely on ordering.
#[derive(Clone, Default)]
pub struct InMemoryTransferStore {
    transfers: Arc<RwLock<BTreeMap<(Partition, TransferId), Transfer>>>,
    journal: Arc<RwLock<HashSet<(TransferKey, TaskType)>>>,
}

impl InMemoryTransferStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of transfers stored.
    pub async fn transfer_count(&self) -> usize {
        self.transfers.read().await.len()
    }

    /// Returns the total number of journal entries.
    pub async fn journal_count(&self) -> usize {
        self.journal.read().await.len()
    }

    /// Clears all transfers and journal entries.
    pub async fn clear(&self) {
        self.transfers.write().await.clear();
        self.journal.write().await.clear();
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn insert(&self, transfer: &Transfer) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        if transfers
            .values()
            .any(|t| t.external_id == transfer.external_id)
        {
            return Err(TransferStoreError::DuplicateExternalId(
                transfer.external_id.clone(),
            ));
        }
        transfers.insert((transfer.partition, transfer.id), transfer.clone());
        Ok(())
    }

    async fn load(&self, key: TransferKey) -> Result<Option<Transfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers.get(&(key.partition, key.id)).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|t| t.external_id == external_id)
            .cloned())
    }

    async fn find_by_external_id_in_range(
        &self,
        external_id: &str,
        range: PartitionRange,
    ) -> Result<Option<Transfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|t| t.external_id == external_id && range.contains(t.partition))
            .cloned())
    }

    async fn find_by_external_id_in_partition(
        &self,
        external_id: &str,
        partition: Partition,
    ) -> Result<Option<Transfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|t| t.external_id == external_id && t.partition == partition)
            .cloned())
    }

    async fn find_by_suit(&self, suit: &str, partition: Partition) -> Result<Option<Transfer>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|t| t.suit == suit && t.partition == partition)
            .cloned())
    }

    async fn find_unpublished(&self, query: OutboxQuery) -> Result<Vec<TransferKey>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .filter(|t| {
                !t.published
                    && t.created_at < query.older_than
                    && query.range.contains(t.partition)
            })
            .map(Transfer::key)
            .take(query.limit as usize)
            .collect())
    }

    async fn find_due_for_retry(&self, query: RetryQuery) -> Result<Vec<TransferKey>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .filter(|t| {
                t.status == query.status
                    && t.next_retry_at.is_some_and(|at| at <= query.not_after)
                    && query.range.contains(t.partition)
            })
            .map(Transfer::key)
            .take(query.limit as usize)
            .collect())
    }

    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TransferKey>> {
        let transfers = self.transfers.read().await;
        let journal = self.journal.read().await;

        let mut orphans = Vec::new();
        // Each half of the boundary pair is anti-joined independently;
        // duplicates are impossible since the partition is part of the key.
        for partition in [query.pair.lower(), query.pair.upper()] {
            orphans.extend(
                transfers
                    .values()
                    .filter(|t| {
                        t.partition == partition
                            && query.statuses.contains(&t.status)
                            && t.created_at <= query.created_before
                            && !journal.contains(&(t.key(), query.task_type.clone()))
                    })
                    .map(Transfer::key),
            );
        }
        orphans.truncate(query.limit as usize);
        Ok(orphans)
    }

    async fn mark_published(&self, key: TransferKey) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        if let Some(transfer) = transfers.get_mut(&(key.partition, key.id)) {
            transfer.published = true;
        }
        Ok(())
    }

    async fn set_retry_state(
        &self,
        key: TransferKey,
        status: TransferStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut transfers = self.transfers.write().await;
        if let Some(transfer) = transfers.get_mut(&(key.partition, key.id)) {
            transfer.status = status;
            transfer.next_retry_at = next_retry_at;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskJournal for InMemoryTransferStore {
    async fn record(&self, key: TransferKey, task_type: &TaskType) -> Result<RecordOutcome> {
        let mut journal = self.journal.write().await;
        if journal.insert((key, task_type.clone())) {
            Ok(RecordOutcome::Recorded)
        } else {
            Ok(RecordOutcome::AlreadyRecorded)
        }
    }

    async fn contains(&self, key: TransferKey, task_type: &TaskType) -> Result<bool> {
        let journal = self.journal.read().await;
        Ok(journal.contains(&(key, task_type.clone())))
    }
}
