use chrono::{DateTime, Utc};
use common::{BoundaryPair, PartitionRange, TaskType};

use crate::TransferStatus;

/// Parameters for the outbox sweep: unpublished transfers old enough for
/// publication.
///
/// The `older_than` threshold lets near-simultaneous writes settle before
/// publication is attempted. `limit` is the hard cap on the batch; it is the
/// caller's backpressure bound, never exceeded.
#[derive(Debug, Clone, Copy)]
pub struct OutboxQuery {
    /// Only transfers created strictly before this instant qualify.
    pub older_than: DateTime<Utc>,

    /// Partition range swept by this worker.
    pub range: PartitionRange,

    /// Hard upper bound on the result size.
    pub limit: u32,
}

impl OutboxQuery {
    /// Creates an outbox query.
    pub fn new(older_than: DateTime<Utc>, range: PartitionRange, limit: u32) -> Self {
        Self {
            older_than,
            range,
            limit,
        }
    }
}

/// Parameters for the retry sweep: transfers in a retryable status whose
/// next-retry time has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct RetryQuery {
    /// Status the transfer must currently hold.
    pub status: TransferStatus,

    /// Only transfers with `next_retry_at <= not_after` qualify.
    pub not_after: DateTime<Utc>,

    /// Partition range swept by this worker.
    pub range: PartitionRange,

    /// Hard upper bound on the result size.
    pub limit: u32,
}

impl RetryQuery {
    /// Creates a retry query.
    pub fn new(
        status: TransferStatus,
        not_after: DateTime<Utc>,
        range: PartitionRange,
        limit: u32,
    ) -> Self {
        Self {
            status,
            not_after,
            range,
            limit,
        }
    }
}

/// Parameters for the reconciliation sweep: transfers in a task-expecting
/// status with no journal entry for the given task type.
///
/// The two partitions of the boundary pair are anti-joined independently and
/// the results unioned; duplicates are impossible because the partition is
/// part of the anti-join key. The combined result is capped at `limit`.
/// Result order is unspecified.
#[derive(Debug, Clone)]
pub struct OrphanQuery {
    /// Statuses that expect a downstream task.
    pub statuses: Vec<TransferStatus>,

    /// Task type whose journal entry must be absent.
    pub task_type: TaskType,

    /// Only transfers created at or before this instant qualify, so records
    /// still mid-dispatch are not reported as orphans.
    pub created_before: DateTime<Utc>,

    /// The two adjacent partitions covered by this sweep.
    pub pair: BoundaryPair,

    /// Hard upper bound on the combined result size.
    pub limit: u32,
}

impl OrphanQuery {
    /// Creates an orphan query.
    pub fn new(
        statuses: Vec<TransferStatus>,
        task_type: TaskType,
        created_before: DateTime<Utc>,
        pair: BoundaryPair,
        limit: u32,
    ) -> Self {
        Self {
            statuses,
            task_type,
            created_before,
            pair,
            limit,
        }
    }
}
