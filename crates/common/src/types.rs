use serde::{Deserialize, Serialize};

use crate::Partition;

/// Unique identifier for a transfer, drawn from the shared monotonic sequence.
///
/// Wraps the raw sequence value to provide type safety and prevent mixing up
/// transfer ids with other integer-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

impl TransferId {
    /// Creates a transfer ID from a raw sequence value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the underlying sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TransferId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<TransferId> for i64 {
    fn from(id: TransferId) -> Self {
        id.0
    }
}

/// Composite identity of a transfer: sequence value plus partition.
///
/// The partition is assigned once at creation and never changes, so the pair
/// is stable for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub id: TransferId,
    pub partition: Partition,
}

impl TransferKey {
    /// Creates a key from its two components.
    pub fn new(id: TransferId, partition: Partition) -> Self {
        Self { id, partition }
    }
}

impl std::fmt::Display for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.id, self.partition)
    }
}

/// Type of a downstream task recorded in the task journal.
///
/// Journal entries are keyed by `(transfer id, partition, task type)`, so two
/// different task types for the same transfer are independent entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    /// Creates a task type from its wire name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_id_roundtrip() {
        let id = TransferId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(TransferId::from(42), id);
    }

    #[test]
    fn transfer_id_serialization_is_transparent() {
        let id = TransferId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: TransferId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn transfer_key_display() {
        let key = TransferKey::new(TransferId::new(10), Partition::new(3));
        assert_eq!(key.to_string(), "10/3");
    }

    #[test]
    fn task_type_preserves_name() {
        let task = TaskType::new("SEND");
        assert_eq!(task.as_str(), "SEND");
        assert_eq!(TaskType::from("SEND"), task);
    }
}
