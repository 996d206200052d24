//! Outbox publisher: pushes unsent transfers to the message broker.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{PartitionRange, TransferKey};
use thiserror::Error;
use transfer_store::{OutboxQuery, Transfer, TransferStore};

use crate::error::Result;

/// Errors returned by a broker publisher.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached. The transfer stays unpublished and
    /// the next sweep retries; never escalated to data loss.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected the payload.
    #[error("broker rejected payload: {0}")]
    Rejected(String),
}

/// Trait for publishing transfer payloads to the message broker.
///
/// Delivery is at-least-once: a crash between publish and flag update causes
/// a republish on the next sweep, and downstream consumers deduplicate on
/// the external reference id.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publishes one transfer payload.
    async fn publish(&self, transfer: &Transfer) -> std::result::Result<(), BrokerError>;
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    published: Vec<serde_json::Value>,
    fail_on_publish: bool,
}

/// In-memory broker for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the broker to fail publish calls.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Returns the number of published payloads.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Returns the external ids of all published payloads, in publish order.
    pub fn published_external_ids(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .published
            .iter()
            .filter_map(|p| p.get("external_id"))
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl BrokerPublisher for InMemoryBroker {
    async fn publish(&self, transfer: &Transfer) -> std::result::Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_publish {
            return Err(BrokerError::Unavailable("broker offline".to_string()));
        }
        let payload = serde_json::to_value(transfer)
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;
        state.published.push(payload);
        Ok(())
    }
}

/// Outbox publisher configuration.
#[derive(Debug, Clone, Copy)]
pub struct OutboxConfig {
    /// Minimum age before an unpublished transfer is picked up, so
    /// near-simultaneous writes settle before publication is attempted.
    pub settle: Duration,

    /// Hard cap on transfers handled per sweep.
    pub limit: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            settle: Duration::seconds(5),
            limit: 200,
        }
    }
}

/// Result of one outbox sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxReport {
    /// Transfers published and flagged this sweep.
    pub published: u64,

    /// Publish attempts that failed; the rows stay unpublished for the next
    /// sweep.
    pub failed: u64,

    /// Rows another worker published between selection and load.
    pub skipped: u64,
}

/// Polls unsent transfers older than the settle threshold and pushes them to
/// the broker, then flags them sent.
///
/// Publish and flag update are two separate steps, deliberately not atomic:
/// the crash window between them is what makes delivery at-least-once rather
/// than at-most-once.
pub struct OutboxPublisher<S, B> {
    store: S,
    broker: B,
    config: OutboxConfig,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: TransferStore,
    B: BrokerPublisher,
{
    /// Creates an outbox publisher.
    pub fn new(store: S, broker: B, config: OutboxConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Returns the keys currently pending publication within the range.
    ///
    /// Never returns a transfer whose published flag is already set.
    pub async fn pending(&self, range: PartitionRange) -> Result<Vec<TransferKey>> {
        let older_than = Utc::now() - self.config.settle;
        let keys = self
            .store
            .find_unpublished(OutboxQuery::new(older_than, range, self.config.limit))
            .await?;
        Ok(keys)
    }

    /// Runs one publication sweep over the range.
    #[tracing::instrument(skip(self), fields(range = %range))]
    pub async fn sweep(&self, range: PartitionRange) -> Result<OutboxReport> {
        let mut report = OutboxReport::default();

        for key in self.pending(range).await? {
            let Some(transfer) = self.store.load(key).await? else {
                continue;
            };
            if transfer.published {
                // Another worker won between selection and load.
                report.skipped += 1;
                continue;
            }

            match self.broker.publish(&transfer).await {
                Ok(()) => {
                    self.store.mark_published(key).await?;
                    report.published += 1;
                    metrics::counter!("outbox_published_total").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(%key, error = %e, "publish failed, row stays unpublished");
                }
            }
        }

        if report.published > 0 || report.failed > 0 {
            tracing::info!(
                published = report.published,
                failed = report.failed,
                skipped = report.skipped,
                "outbox sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use common::{Partition, TransferId};
    use transfer_store::InMemoryTransferStore;

    use super::*;

    fn aged_transfer(id: i64, partition: i32, ext: &str) -> Transfer {
        Transfer::builder()
            .id(TransferId::new(id))
            .partition(Partition::new(partition))
            .external_id(ext)
            .suit(format!("suit-{ext}"))
            .created_at(Utc::now() - Duration::minutes(1))
            .build()
    }

    fn range(from: i32, to: i32) -> PartitionRange {
        PartitionRange::new(Partition::new(from), Partition::new(to)).unwrap()
    }

    fn publisher(
        store: InMemoryTransferStore,
        broker: InMemoryBroker,
    ) -> OutboxPublisher<InMemoryTransferStore, InMemoryBroker> {
        OutboxPublisher::new(
            store,
            broker,
            OutboxConfig {
                settle: Duration::seconds(1),
                limit: 100,
            },
        )
    }

    #[tokio::test]
    async fn sweep_publishes_and_flags() {
        let store = InMemoryTransferStore::new();
        let broker = InMemoryBroker::new();
        let t = aged_transfer(1, 3, "A1");
        store.insert(&t).await.unwrap();

        let publisher = publisher(store.clone(), broker.clone());
        let report = publisher.sweep(range(0, 5)).await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(broker.published_external_ids(), vec!["A1"]);
        assert!(store.load(t.key()).await.unwrap().unwrap().published);

        // A published transfer is never selected again.
        assert!(publisher.pending(range(0, 5)).await.unwrap().is_empty());
        let report = publisher.sweep(range(0, 5)).await.unwrap();
        assert_eq!(report, OutboxReport::default());
        assert_eq!(broker.published_count(), 1);
    }

    #[tokio::test]
    async fn settle_threshold_defers_fresh_rows() {
        let store = InMemoryTransferStore::new();
        let broker = InMemoryBroker::new();

        let mut fresh = aged_transfer(1, 3, "A1");
        fresh.created_at = Utc::now();
        store.insert(&fresh).await.unwrap();

        let publisher = OutboxPublisher::new(
            store,
            broker.clone(),
            OutboxConfig {
                settle: Duration::seconds(30),
                limit: 100,
            },
        );
        let report = publisher.sweep(range(0, 5)).await.unwrap();

        assert_eq!(report.published, 0);
        assert_eq!(broker.published_count(), 0);
    }

    #[tokio::test]
    async fn broker_failure_leaves_row_unpublished() {
        let store = InMemoryTransferStore::new();
        let broker = InMemoryBroker::new();
        broker.set_fail_on_publish(true);

        let t = aged_transfer(1, 3, "A1");
        store.insert(&t).await.unwrap();

        let publisher = publisher(store.clone(), broker.clone());
        let report = publisher.sweep(range(0, 5)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!store.load(t.key()).await.unwrap().unwrap().published);

        // The broker recovers; the next sweep delivers.
        broker.set_fail_on_publish(false);
        let report = publisher.sweep(range(0, 5)).await.unwrap();
        assert_eq!(report.published, 1);
        assert!(store.load(t.key()).await.unwrap().unwrap().published);
    }

    #[tokio::test]
    async fn sweep_respects_limit() {
        let store = InMemoryTransferStore::new();
        let broker = InMemoryBroker::new();
        for i in 0..10 {
            store
                .insert(&aged_transfer(i, 3, &format!("A{i}")))
                .await
                .unwrap();
        }

        let publisher = OutboxPublisher::new(
            store,
            broker,
            OutboxConfig {
                settle: Duration::seconds(1),
                limit: 4,
            },
        );
        let report = publisher.sweep(range(0, 5)).await.unwrap();
        assert_eq!(report.published, 4);
    }

    #[tokio::test]
    async fn sweep_is_partition_scoped() {
        let store = InMemoryTransferStore::new();
        let broker = InMemoryBroker::new();
        store.insert(&aged_transfer(1, 3, "in")).await.unwrap();
        store.insert(&aged_transfer(2, 9, "out")).await.unwrap();

        let publisher = publisher(store, broker.clone());
        publisher.sweep(range(0, 5)).await.unwrap();

        assert_eq!(broker.published_external_ids(), vec!["in"]);
    }
}
