//! Durable substrate of the transfer reliability engine.
//!
//! Provides the transfer record model, the partition-scoped store trait with
//! in-memory and PostgreSQL implementations, the task journal (idempotency
//! ledger) and the batch sequence allocator.

pub mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod sequence;
pub mod store;
pub mod transfer;

pub use common::{Partition, PartitionRange, TaskType, TransferId, TransferKey};
pub use error::{Result, TransferStoreError};
pub use journal::{RecordOutcome, TaskJournal};
pub use memory::InMemoryTransferStore;
pub use postgres::{PostgresSequenceAllocator, PostgresTransferStore};
pub use query::{OrphanQuery, OutboxQuery, RetryQuery};
pub use sequence::{BatchedSequence, InMemorySequenceAllocator, SequenceAllocator, SequenceError};
pub use store::{TransferStore, TransferStoreExt};
pub use transfer::{Transfer, TransferBuilder, TransferStatus, UnknownStatus};
