use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use common::TransferId;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors that can occur when allocating sequence values.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The underlying counter is unreachable. Transient: callers retry with
    /// backoff and must not fabricate ids.
    #[error("sequence counter unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// The counter returned fewer values than requested. Broken contract,
    /// surfaced rather than papered over.
    #[error("sequence returned {received} values, requested {requested}")]
    ShortAllocation { requested: usize, received: usize },
}

/// Result type for sequence operations.
pub type Result<T> = std::result::Result<T, SequenceError>;

/// Batch allocator of monotonic transfer ids.
///
/// A single call fetches `count` values in one round trip to the shared
/// counter; uniqueness across concurrent callers is delegated to the
/// counter itself, so two callers can never receive overlapping ranges.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Allocates `count` monotonically increasing ids.
    async fn allocate(&self, count: usize) -> Result<Vec<TransferId>>;
}

/// In-memory sequence allocator for testing.
///
/// Backed by an atomic counter, so concurrent allocations still receive
/// disjoint ranges.
#[derive(Debug, Default)]
pub struct InMemorySequenceAllocator {
    next: AtomicI64,
}

impl InMemorySequenceAllocator {
    /// Creates an allocator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceAllocator for InMemorySequenceAllocator {
    async fn allocate(&self, count: usize) -> Result<Vec<TransferId>> {
        let start = self.next.fetch_add(count as i64, Ordering::Relaxed);
        Ok((1..=count as i64).map(|i| TransferId::new(start + i)).collect())
    }
}

/// Wrapper that pre-fetches a batch of ids and hands them out locally.
///
/// Amortizes contention on the shared counter: one upstream allocation per
/// `batch_size` consumed ids. The pool refills on exhaustion.
pub struct BatchedSequence<A> {
    allocator: A,
    batch_size: usize,
    pool: Mutex<VecDeque<TransferId>>,
}

impl<A: SequenceAllocator> BatchedSequence<A> {
    /// Creates a batched wrapper around an allocator.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(allocator: A, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            allocator,
            batch_size,
            pool: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the next id, refilling the local pool if it is empty.
    pub async fn next(&self) -> Result<TransferId> {
        let mut pool = self.pool.lock().await;
        if let Some(id) = pool.pop_front() {
            return Ok(id);
        }
        let batch = self.allocator.allocate(self.batch_size).await?;
        if batch.len() < self.batch_size {
            return Err(SequenceError::ShortAllocation {
                requested: self.batch_size,
                received: batch.len(),
            });
        }
        pool.extend(batch);
        pool.pop_front().ok_or(SequenceError::ShortAllocation {
            requested: self.batch_size,
            received: 0,
        })
    }

    /// Number of ids remaining in the local pool.
    pub async fn pooled(&self) -> usize {
        self.pool.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn allocate_returns_requested_count_in_order() {
        let allocator = InMemorySequenceAllocator::new();
        let ids = allocator.allocate(5).await.unwrap();
        assert_eq!(ids.len(), 5);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[tokio::test]
    async fn concurrent_allocations_never_overlap() {
        let allocator = Arc::new(InMemorySequenceAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                allocator.allocate(100).await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "id {id} allocated twice");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[tokio::test]
    async fn batched_sequence_refills_on_exhaustion() {
        let batched = BatchedSequence::new(InMemorySequenceAllocator::new(), 3);

        let first = batched.next().await.unwrap();
        assert_eq!(batched.pooled().await, 2);

        let second = batched.next().await.unwrap();
        let third = batched.next().await.unwrap();
        assert_eq!(batched.pooled().await, 0);

        // Next call triggers a refill from the upstream allocator.
        let fourth = batched.next().await.unwrap();
        assert_eq!(batched.pooled().await, 2);

        assert!(first < second && second < third && third < fourth);
    }

    #[tokio::test]
    async fn batched_sequence_unique_under_concurrency() {
        let batched = Arc::new(BatchedSequence::new(InMemorySequenceAllocator::new(), 10));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let batched = Arc::clone(&batched);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    ids.push(batched.next().await.unwrap());
                }
                ids
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    #[should_panic(expected = "batch size must be positive")]
    fn batched_sequence_rejects_zero_batch() {
        BatchedSequence::new(InMemorySequenceAllocator::new(), 0);
    }
}
