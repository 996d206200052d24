use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A bounded integer shard assigned to a transfer at creation.
///
/// Partitions scope store queries and worker ownership: every sweep operates
/// on an explicit partition range, never on the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(i32);

impl Partition {
    /// Creates a partition from its raw number.
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw partition number.
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Partition {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Partition> for i32 {
    fn from(partition: Partition) -> Self {
        partition.0
    }
}

/// Error for a partition range whose lower bound exceeds its upper bound.
///
/// Classified as fatal configuration: the affected sweep must stop and the
/// bounds must be surfaced to operators, not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid partition range: from {from} exceeds to {to}")]
pub struct InvalidPartitionRange {
    pub from: i32,
    pub to: i32,
}

/// An inclusive, contiguous range of partitions claimed by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    from: Partition,
    to: Partition,
}

impl PartitionRange {
    /// Creates a range covering `[from, to]`, both inclusive.
    pub fn new(
        from: Partition,
        to: Partition,
    ) -> std::result::Result<Self, InvalidPartitionRange> {
        if from > to {
            return Err(InvalidPartitionRange {
                from: from.as_i32(),
                to: to.as_i32(),
            });
        }
        Ok(Self { from, to })
    }

    /// Creates a range holding a single partition.
    pub fn single(partition: Partition) -> Self {
        Self {
            from: partition,
            to: partition,
        }
    }

    /// Lower bound, inclusive.
    pub fn from(&self) -> Partition {
        self.from
    }

    /// Upper bound, inclusive.
    pub fn to(&self) -> Partition {
        self.to
    }

    /// Returns true if the partition falls within the range.
    pub fn contains(&self, partition: Partition) -> bool {
        partition >= self.from && partition <= self.to
    }

    /// Number of partitions covered.
    pub fn len(&self) -> usize {
        (self.to.as_i32() - self.from.as_i32() + 1) as usize
    }

    /// A range always covers at least one partition.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates the partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Partition> + '_ {
        (self.from.as_i32()..=self.to.as_i32()).map(Partition::new)
    }
}

impl std::fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{}]", self.from, self.to)
    }
}

/// Error for a boundary pair whose partitions are not strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid boundary pair: lower {lower} must be strictly below upper {upper}")]
pub struct InvalidBoundaryPair {
    pub lower: i32,
    pub upper: i32,
}

/// Two adjacent partitions covered by a single reconciliation sweep.
///
/// A sweep over a boundary pair guards against off-by-one ownership at the
/// edges of a worker's assigned range during rebalancing: each half is
/// queried independently and the results are unioned, so duplicates are
/// impossible (the partition is part of the anti-join key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryPair {
    lower: Partition,
    upper: Partition,
}

impl BoundaryPair {
    /// Creates a pair of two distinct partitions, lower strictly first.
    pub fn new(
        lower: Partition,
        upper: Partition,
    ) -> std::result::Result<Self, InvalidBoundaryPair> {
        if lower >= upper {
            return Err(InvalidBoundaryPair {
                lower: lower.as_i32(),
                upper: upper.as_i32(),
            });
        }
        Ok(Self { lower, upper })
    }

    /// The pair `(partition, partition + 1)`.
    pub fn adjacent(partition: Partition) -> Self {
        Self {
            lower: partition,
            upper: Partition::new(partition.as_i32() + 1),
        }
    }

    /// Lower partition of the pair.
    pub fn lower(&self) -> Partition {
        self.lower
    }

    /// Upper partition of the pair.
    pub fn upper(&self) -> Partition {
        self.upper
    }
}

impl std::fmt::Display for BoundaryPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lower, self.upper)
    }
}

/// Deterministic mapping of an external reference id to a partition.
///
/// Uses crc32 of the id modulo the partition count, so the assignment is
/// stable across processes and restarts. The count is fixed for the lifetime
/// of a deployment; changing it reshuffles ownership of new records only,
/// since a transfer keeps the partition assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionKeySpace {
    partitions: u16,
}

impl PartitionKeySpace {
    /// Creates a key space over `partitions` shards, numbered `0..partitions`.
    ///
    /// # Panics
    ///
    /// Panics if `partitions` is zero.
    pub fn new(partitions: u16) -> Self {
        assert!(partitions > 0, "partition count must be positive");
        Self { partitions }
    }

    /// Number of partitions in the space.
    pub fn partitions(&self) -> u16 {
        self.partitions
    }

    /// The full range `[0, partitions - 1]`.
    pub fn full_range(&self) -> PartitionRange {
        PartitionRange {
            from: Partition::new(0),
            to: Partition::new(i32::from(self.partitions) - 1),
        }
    }

    /// Maps an external reference id to its partition.
    pub fn partition_for(&self, external_id: &str) -> Partition {
        let hash = crc32fast::hash(external_id.as_bytes());
        Partition::new((hash % u32::from(self.partitions)) as i32)
    }
}
