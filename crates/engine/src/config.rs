//! Engine configuration loaded from environment variables.

use std::time::Duration;

use bulkhead::BulkheadConfig;
use common::{InvalidPartitionRange, Partition, PartitionKeySpace, PartitionRange, TaskType};
use transfer_store::{TransferStatus, UnknownStatus};

use crate::outbox::OutboxConfig;
use crate::reconcile::ReconcileConfig;
use crate::retry::RetryConfig;
use crate::runtime::SweepSchedule;

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `TRANSFER_PART_FROM` / `TRANSFER_PART_TO` — partition range this worker
///   sweeps (default: `0..15`)
/// - `TRANSFER_PARTITIONS` — size of the partition key space (default: `16`)
/// - `BULKHEAD_MAX_WORKERS` — blocking-pool cap (default: `8`)
/// - `SEQUENCE_BATCH` — ids pre-fetched per counter round trip (default: `50`)
/// - `OUTBOX_SETTLE_SECS`, `OUTBOX_LIMIT`, `OUTBOX_INTERVAL_SECS`
/// - `RETRY_RECLAIM_SECS`, `RETRY_LIMIT`, `RETRY_INTERVAL_SECS`
/// - `RECONCILE_MIN_AGE_SECS`, `RECONCILE_LIMIT`, `RECONCILE_INTERVAL_SECS`
/// - `RECONCILE_STATUSES` — comma-separated status values (default:
///   `"PENDING_TASK"`)
/// - `TASK_TYPE` — journaled task type (default: `"SEND"`)
/// - `SWEEP_BUDGET_SECS` — per-sweep time budget (default: `30`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub partition_from: i32,
    pub partition_to: i32,
    pub partitions: u16,
    pub bulkhead_max_workers: usize,
    pub sequence_batch: usize,
    pub outbox_settle_secs: u64,
    pub outbox_limit: u32,
    pub outbox_interval_secs: u64,
    pub retry_reclaim_secs: u64,
    pub retry_limit: u32,
    pub retry_interval_secs: u64,
    pub reconcile_min_age_secs: u64,
    pub reconcile_limit: u32,
    pub reconcile_interval_secs: u64,
    pub reconcile_statuses: String,
    pub task_type: String,
    pub sweep_budget_secs: u64,
    pub log_level: String,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            partition_from: env_parsed("TRANSFER_PART_FROM", 0),
            partition_to: env_parsed("TRANSFER_PART_TO", 15),
            partitions: env_parsed("TRANSFER_PARTITIONS", 16),
            bulkhead_max_workers: env_parsed("BULKHEAD_MAX_WORKERS", 8),
            sequence_batch: env_parsed("SEQUENCE_BATCH", 50),
            outbox_settle_secs: env_parsed("OUTBOX_SETTLE_SECS", 5),
            outbox_limit: env_parsed("OUTBOX_LIMIT", 200),
            outbox_interval_secs: env_parsed("OUTBOX_INTERVAL_SECS", 5),
            retry_reclaim_secs: env_parsed("RETRY_RECLAIM_SECS", 300),
            retry_limit: env_parsed("RETRY_LIMIT", 100),
            retry_interval_secs: env_parsed("RETRY_INTERVAL_SECS", 10),
            reconcile_min_age_secs: env_parsed("RECONCILE_MIN_AGE_SECS", 600),
            reconcile_limit: env_parsed("RECONCILE_LIMIT", 100),
            reconcile_interval_secs: env_parsed("RECONCILE_INTERVAL_SECS", 60),
            reconcile_statuses: std::env::var("RECONCILE_STATUSES")
                .unwrap_or_else(|_| "PENDING_TASK".to_string()),
            task_type: std::env::var("TASK_TYPE").unwrap_or_else(|_| "SEND".to_string()),
            sweep_budget_secs: env_parsed("SWEEP_BUDGET_SECS", 30),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// The partition range this worker sweeps.
    ///
    /// Inverted bounds are a fatal configuration error.
    pub fn partition_range(&self) -> Result<PartitionRange, InvalidPartitionRange> {
        PartitionRange::new(
            Partition::new(self.partition_from),
            Partition::new(self.partition_to),
        )
    }

    /// The key space used to derive partitions at ingestion.
    pub fn key_space(&self) -> PartitionKeySpace {
        PartitionKeySpace::new(self.partitions)
    }

    /// Bulkhead configuration.
    pub fn bulkhead_config(&self) -> BulkheadConfig {
        BulkheadConfig::new(self.bulkhead_max_workers)
    }

    /// Outbox publisher configuration.
    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            settle: chrono::Duration::seconds(self.outbox_settle_secs as i64),
            limit: self.outbox_limit,
        }
    }

    /// Retry scheduler configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            status: TransferStatus::Retry,
            reclaim: chrono::Duration::seconds(self.retry_reclaim_secs as i64),
            limit: self.retry_limit,
        }
    }

    /// Reconciler configuration.
    ///
    /// An unknown status value in `RECONCILE_STATUSES` is a fatal
    /// configuration error.
    pub fn reconcile_config(&self) -> Result<ReconcileConfig, UnknownStatus> {
        let statuses = self
            .reconcile_statuses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<TransferStatus>, UnknownStatus>>()?;

        Ok(ReconcileConfig {
            statuses,
            task_type: TaskType::new(self.task_type.clone()),
            min_age: chrono::Duration::seconds(self.reconcile_min_age_secs as i64),
            limit: self.reconcile_limit,
        })
    }

    /// Sweep intervals and budget.
    pub fn schedule(&self) -> SweepSchedule {
        SweepSchedule {
            outbox_every: Duration::from_secs(self.outbox_interval_secs),
            retry_every: Duration::from_secs(self.retry_interval_secs),
            reconcile_every: Duration::from_secs(self.reconcile_interval_secs),
            budget: Duration::from_secs(self.sweep_budget_secs),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_from: 0,
            partition_to: 15,
            partitions: 16,
            bulkhead_max_workers: 8,
            sequence_batch: 50,
            outbox_settle_secs: 5,
            outbox_limit: 200,
            outbox_interval_secs: 5,
            retry_reclaim_secs: 300,
            retry_limit: 100,
            retry_interval_secs: 10,
            reconcile_min_age_secs: 600,
            reconcile_limit: 100,
            reconcile_interval_secs: 60,
            reconcile_statuses: "PENDING_TASK".to_string(),
            task_type: "SEND".to_string(),
            sweep_budget_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.partition_from, 0);
        assert_eq!(config.partition_to, 15);
        assert_eq!(config.bulkhead_max_workers, 8);
        assert_eq!(config.task_type, "SEND");
    }

    #[test]
    fn test_partition_range_validation() {
        let config = EngineConfig {
            partition_from: 9,
            partition_to: 3,
            ..EngineConfig::default()
        };
        assert!(config.partition_range().is_err());
        assert!(EngineConfig::default().partition_range().is_ok());
    }

    #[test]
    fn test_reconcile_statuses_parsing() {
        let config = EngineConfig {
            reconcile_statuses: "PENDING_TASK, RETRY".to_string(),
            ..EngineConfig::default()
        };
        let reconcile = config.reconcile_config().unwrap();
        assert_eq!(
            reconcile.statuses,
            vec![TransferStatus::PendingTask, TransferStatus::Retry]
        );
    }

    #[test]
    fn test_reconcile_statuses_reject_unknown() {
        let config = EngineConfig {
            reconcile_statuses: "SHIPPED".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.reconcile_config().is_err());
    }

    #[test]
    fn test_schedule_conversion() {
        let schedule = EngineConfig::default().schedule();
        assert_eq!(schedule.outbox_every, Duration::from_secs(5));
        assert_eq!(schedule.budget, Duration::from_secs(30));
    }
}
