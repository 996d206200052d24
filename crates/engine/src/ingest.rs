//! Idempotent transfer ingestion.

use common::{Partition, PartitionKeySpace, TransferId};
use transfer_store::{
    BatchedSequence, SequenceAllocator, Transfer, TransferStatus, TransferStore,
    TransferStoreError,
};

use crate::error::Result;

/// A request to create a transfer.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    /// Globally unique external reference id.
    pub external_id: String,

    /// Alternate business lookup key.
    pub suit: String,

    /// Pre-set id. When absent, an id is drawn from the sequence.
    pub id: Option<TransferId>,

    /// Explicit partition. When absent, the partition is derived from the
    /// external id via the key space.
    pub partition: Option<Partition>,

    /// Initial status. Defaults to `New`.
    pub status: TransferStatus,
}

impl NewTransfer {
    /// Creates a request with the default initial status.
    pub fn new(external_id: impl Into<String>, suit: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            suit: suit.into(),
            id: None,
            partition: None,
            status: TransferStatus::New,
        }
    }

    /// Pins the id instead of drawing one from the sequence.
    pub fn with_id(mut self, id: TransferId) -> Self {
        self.id = Some(id);
        self
    }

    /// Pins the partition instead of deriving it from the external id.
    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Overrides the initial status.
    pub fn with_status(mut self, status: TransferStatus) -> Self {
        self.status = status;
        self
    }
}

/// Outcome of an ingestion call.
#[derive(Debug, Clone)]
pub enum Ingested {
    /// A new transfer was created by this call.
    Created(Transfer),

    /// The external id was already known; the existing record is returned
    /// and nothing was written.
    Existing(Transfer),
}

impl Ingested {
    /// Returns true if this call created the transfer.
    pub fn is_created(&self) -> bool {
        matches!(self, Ingested::Created(_))
    }

    /// Unwraps the transfer record.
    pub fn into_transfer(self) -> Transfer {
        match self {
            Ingested::Created(t) | Ingested::Existing(t) => t,
        }
    }
}

/// Creates transfers idempotently on the external reference id.
///
/// Ids come from the batched sequence, so a burst of ingestions costs one
/// counter round trip per batch. Re-ingestion of a known external id is a
/// no-op returning the existing record; a duplicate-insert race converges on
/// the winner.
pub struct IngestionService<S, A> {
    store: S,
    sequence: BatchedSequence<A>,
    key_space: PartitionKeySpace,
}

impl<S, A> IngestionService<S, A>
where
    S: TransferStore,
    A: SequenceAllocator,
{
    /// Creates an ingestion service.
    pub fn new(store: S, sequence: BatchedSequence<A>, key_space: PartitionKeySpace) -> Self {
        Self {
            store,
            sequence,
            key_space,
        }
    }

    /// Ingests a transfer, idempotently on its external reference id.
    #[tracing::instrument(skip(self, request), fields(external_id = %request.external_id))]
    pub async fn ingest(&self, request: NewTransfer) -> Result<Ingested> {
        if let Some(existing) = self.store.find_by_external_id(&request.external_id).await? {
            metrics::counter!("ingest_deduplicated_total").increment(1);
            return Ok(Ingested::Existing(existing));
        }

        let id = match request.id {
            Some(id) => id,
            None => self.sequence.next().await?,
        };
        let partition = request
            .partition
            .unwrap_or_else(|| self.key_space.partition_for(&request.external_id));

        let transfer = Transfer::builder()
            .id(id)
            .partition(partition)
            .external_id(request.external_id)
            .suit(request.suit)
            .status(request.status)
            .build();

        match self.store.insert(&transfer).await {
            Ok(()) => {
                metrics::counter!("ingest_created_total").increment(1);
                tracing::info!(key = %transfer.key(), "transfer ingested");
                Ok(Ingested::Created(transfer))
            }
            Err(TransferStoreError::DuplicateExternalId(external_id)) => {
                // Lost the race against a concurrent ingestion of the same
                // id: converge on the winner.
                metrics::counter!("ingest_deduplicated_total").increment(1);
                match self.store.find_by_external_id(&external_id).await? {
                    Some(winner) => Ok(Ingested::Existing(winner)),
                    None => Err(TransferStoreError::DuplicateExternalId(external_id).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
