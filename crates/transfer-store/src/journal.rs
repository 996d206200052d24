use async_trait::async_trait;
use common::{TaskType, TransferKey};

use crate::Result;

/// Outcome of recording a task dispatch in the journal.
///
/// `AlreadyRecorded` is not an error: it is the signal other components use
/// to avoid double-dispatch, and callers must treat it as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The entry was created by this call.
    Recorded,

    /// An entry for this key already existed.
    AlreadyRecorded,
}

impl RecordOutcome {
    /// Returns true if this call created the entry.
    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::Recorded)
    }
}

/// Append-only idempotency ledger of started downstream tasks.
///
/// At most one entry exists per `(transfer id, partition, task type)`:
/// concurrent `record` calls for the same key converge to exactly one
/// logical entry. Absence of an entry does not prove failure — only that no
/// attempt has been journaled yet; the store write and the journal write are
/// not transactionally atomic, which is why the reconciler exists.
/// Entries are immutable and never deleted.
#[async_trait]
pub trait TaskJournal: Send + Sync {
    /// Records that a task of the given type has been started for the
    /// transfer. Insert-if-absent.
    async fn record(&self, key: TransferKey, task_type: &TaskType) -> Result<RecordOutcome>;

    /// Returns true if an entry exists for the key.
    async fn contains(&self, key: TransferKey, task_type: &TaskType) -> Result<bool>;
}
