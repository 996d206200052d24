//! Retry scheduler: re-drives transfers whose retry time has elapsed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{PartitionRange, TransferKey};
use transfer_store::{RetryQuery, Transfer, TransferStatus, TransferStore};

use crate::error::Result;

/// Decision of a retry attempt.
///
/// Backoff policy is the handler's concern, not the scheduler's: the handler
/// chooses both the terminal status and the next retry instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The operation finished; the transfer leaves the retryable set with
    /// this status and its retry timestamp is cleared.
    Finished(TransferStatus),

    /// The operation must be retried no earlier than this instant.
    RetryAt(DateTime<Utc>),
}

/// Trait for the retryable operation driven by the scheduler.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// Attempts the retryable operation for one transfer.
    async fn attempt(&self, transfer: &Transfer) -> RetryOutcome;
}

/// Retry scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// The retryable status swept by this scheduler.
    pub status: TransferStatus,

    /// Lease added to the retry timestamp before the handler runs, so a
    /// concurrent sweep cannot re-select the row mid-attempt. There is no
    /// row lock; advancing the timestamp is the concurrency guard.
    pub reclaim: Duration,

    /// Hard cap on transfers handled per sweep.
    pub limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            status: TransferStatus::Retry,
            reclaim: Duration::minutes(5),
            limit: 100,
        }
    }
}

/// Result of one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Attempts that finished with a new status.
    pub finished: u64,

    /// Attempts re-armed for a later retry.
    pub rearmed: u64,

    /// Rows whose status changed between selection and load.
    pub skipped: u64,
}

/// Selects transfers whose retry time has elapsed and drives the handler
/// over them.
pub struct RetryScheduler<S, H> {
    store: S,
    handler: H,
    config: RetryConfig,
}

impl<S, H> RetryScheduler<S, H>
where
    S: TransferStore,
    H: RetryHandler,
{
    /// Creates a retry scheduler.
    pub fn new(store: S, handler: H, config: RetryConfig) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    /// Returns the keys currently due for retry within the range.
    ///
    /// A transfer is returned only once its retry time has elapsed.
    pub async fn due_for_retry(&self, range: PartitionRange) -> Result<Vec<TransferKey>> {
        let keys = self
            .store
            .find_due_for_retry(RetryQuery::new(
                self.config.status,
                Utc::now(),
                range,
                self.config.limit,
            ))
            .await?;
        Ok(keys)
    }

    /// Runs one retry sweep over the range.
    #[tracing::instrument(skip(self), fields(range = %range))]
    pub async fn sweep(&self, range: PartitionRange) -> Result<RetryReport> {
        let mut report = RetryReport::default();

        for key in self.due_for_retry(range).await? {
            let Some(transfer) = self.store.load(key).await? else {
                continue;
            };
            if transfer.status != self.config.status {
                // A concurrent component moved the transfer on already.
                report.skipped += 1;
                continue;
            }

            // Advance the timestamp before attempting, so a concurrent
            // sweep does not re-select the row while it is being worked.
            self.store
                .set_retry_state(
                    key,
                    transfer.status,
                    Some(Utc::now() + self.config.reclaim),
                )
                .await?;

            match self.handler.attempt(&transfer).await {
                RetryOutcome::Finished(status) => {
                    self.store.set_retry_state(key, status, None).await?;
                    report.finished += 1;
                    metrics::counter!("retry_finished_total").increment(1);
                }
                RetryOutcome::RetryAt(at) => {
                    self.store
                        .set_retry_state(key, self.config.status, Some(at))
                        .await?;
                    report.rearmed += 1;
                    metrics::counter!("retry_rearmed_total").increment(1);
                }
            }
        }

        if report.finished > 0 || report.rearmed > 0 {
            tracing::info!(
                finished = report.finished,
                rearmed = report.rearmed,
                skipped = report.skipped,
                "retry sweep finished"
            );
        }
        Ok(report)
    }
}
