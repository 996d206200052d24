use chrono::{DateTime, Utc};
use common::{Partition, TransferId, TransferKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of a transfer in its lifecycle.
///
/// State transitions:
/// ```text
/// New ──► PendingTask ──► Completed
///              │
///              ▼
///            Retry ──► Completed
///              │
///              └─────► Failed
/// ```
///
/// `Completed` and `Failed` are terminal. `Retry` is the retryable
/// intermediate state: only while a transfer sits in it is the next-retry
/// timestamp meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Freshly ingested, not yet published to the broker.
    New,

    /// A downstream task is expected for this transfer.
    PendingTask,

    /// Waiting for the next retry attempt.
    Retry,

    /// Processing finished successfully (terminal state).
    Completed,

    /// Processing gave up (terminal state).
    Failed,
}

impl TransferStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// Returns true if the retry scheduler may select transfers in this state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferStatus::Retry)
    }

    /// Returns the stored wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::New => "NEW",
            TransferStatus::PendingTask => "PENDING_TASK",
            TransferStatus::Retry => "RETRY",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for a stored status value outside the closed status set.
///
/// Treated as a schema mismatch: fatal, never silently defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transfer status value: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for TransferStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "NEW" => Ok(TransferStatus::New),
            "PENDING_TASK" => Ok(TransferStatus::PendingTask),
            "RETRY" => Ok(TransferStatus::Retry),
            "COMPLETED" => Ok(TransferStatus::Completed),
            "FAILED" => Ok(TransferStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A financial transfer record owned by the reliability engine.
///
/// Identity is the `(id, partition)` pair. The partition is assigned once at
/// creation and never changes; the published flag only ever advances from
/// `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Sequence value identifying this transfer within its partition.
    pub id: TransferId,

    /// Partition assigned at creation.
    pub partition: Partition,

    /// Globally unique external reference id, the idempotent-ingestion key.
    pub external_id: String,

    /// Alternate business lookup key.
    pub suit: String,

    /// Current lifecycle status.
    pub status: TransferStatus,

    /// When the transfer was created.
    pub created_at: DateTime<Utc>,

    /// When the next retry attempt is due. Meaningful only while the status
    /// is retryable.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Whether the transfer has been published to the broker.
    pub published: bool,
}

impl Transfer {
    /// Creates a new transfer builder.
    pub fn builder() -> TransferBuilder {
        TransferBuilder::default()
    }

    /// Returns the composite identity of this transfer.
    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.id, self.partition)
    }
}

/// Builder for constructing transfer records.
#[derive(Debug, Default)]
pub struct TransferBuilder {
    id: Option<TransferId>,
    partition: Option<Partition>,
    external_id: Option<String>,
    suit: Option<String>,
    status: Option<TransferStatus>,
    created_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    published: bool,
}

impl TransferBuilder {
    /// Sets the sequence value.
    pub fn id(mut self, id: TransferId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the partition.
    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Sets the external reference id.
    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Sets the business lookup key.
    pub fn suit(mut self, suit: impl Into<String>) -> Self {
        self.suit = Some(suit.into());
        self
    }

    /// Sets the status. If not set, `New` is used.
    pub fn status(mut self, status: TransferStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the creation timestamp. If not set, the current time is used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Sets the next retry timestamp.
    pub fn next_retry_at(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.next_retry_at = Some(next_retry_at);
        self
    }

    /// Marks the transfer as already published.
    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Builds the transfer.
    ///
    /// # Panics
    ///
    /// Panics if required fields (id, partition, external_id, suit) are not
    /// set.
    pub fn build(self) -> Transfer {
        Transfer {
            id: self.id.expect("id is required"),
            partition: self.partition.expect("partition is required"),
            external_id: self.external_id.expect("external_id is required"),
            suit: self.suit.expect("suit is required"),
            status: self.status.unwrap_or(TransferStatus::New),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            next_retry_at: self.next_retry_at,
            published: self.published,
        }
    }

    /// Tries to build the transfer, returning None if required fields are
    /// missing.
    pub fn try_build(self) -> Option<Transfer> {
        Some(Transfer {
            id: self.id?,
            partition: self.partition?,
            external_id: self.external_id?,
            suit: self.suit?,
            status: self.status.unwrap_or(TransferStatus::New),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            next_retry_at: self.next_retry_at,
            published: self.published,
        })
    }
}
