//! Accident reconciler: finds transfers whose downstream task was never
//! journaled and re-triggers it.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{BoundaryPair, InvalidBoundaryPair, Partition, PartitionRange, TaskType, TransferKey};
use thiserror::Error;
use transfer_store::{OrphanQuery, TaskJournal, TransferStatus, TransferStore};

use crate::error::Result;

/// Error returned by a task dispatcher.
#[derive(Debug, Clone, Error)]
#[error("task dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Trait for re-triggering the downstream task of an orphaned transfer.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Dispatches the task for one transfer.
    async fn dispatch(
        &self,
        key: TransferKey,
        task_type: &TaskType,
    ) -> std::result::Result<(), DispatchError>;
}

#[derive(Debug, Default)]
struct InMemoryDispatcherState {
    dispatched: Vec<(TransferKey, TaskType)>,
    fail_on_dispatch: bool,
}

/// In-memory dispatcher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDispatcher {
    state: Arc<RwLock<InMemoryDispatcherState>>,
}

impl InMemoryDispatcher {
    /// Creates a new in-memory dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the dispatcher to fail dispatch calls.
    pub fn set_fail_on_dispatch(&self, fail: bool) {
        self.state.write().unwrap().fail_on_dispatch = fail;
    }

    /// Returns the number of dispatched tasks.
    pub fn dispatch_count(&self) -> usize {
        self.state.read().unwrap().dispatched.len()
    }

    /// Returns the dispatched keys, in dispatch order.
    pub fn dispatched_keys(&self) -> Vec<TransferKey> {
        self.state
            .read()
            .unwrap()
            .dispatched
            .iter()
            .map(|(key, _)| *key)
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for InMemoryDispatcher {
    async fn dispatch(
        &self,
        key: TransferKey,
        task_type: &TaskType,
    ) -> std::result::Result<(), DispatchError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_dispatch {
            return Err(DispatchError("dispatcher offline".to_string()));
        }
        state.dispatched.push((key, task_type.clone()));
        Ok(())
    }
}

/// Explicitly enumerated partition coverage of the reconciler.
///
/// Which boundary pairs one worker sweeps is an operational policy, not a
/// hard-coded constant: a worker can pin the single pair at the edge of its
/// assigned range, or slide a window of adjacent pairs across the whole
/// range.
#[derive(Debug, Clone)]
pub struct ReconcileCoverage {
    pairs: Vec<BoundaryPair>,
}

impl ReconcileCoverage {
    /// Coverage of explicitly listed pairs.
    pub fn pairs(pairs: Vec<BoundaryPair>) -> Self {
        Self { pairs }
    }

    /// Coverage of a single boundary pair.
    pub fn pair(
        lower: Partition,
        upper: Partition,
    ) -> std::result::Result<Self, InvalidBoundaryPair> {
        Ok(Self {
            pairs: vec![BoundaryPair::new(lower, upper)?],
        })
    }

    /// Sliding window of adjacent pairs across a worker's range.
    ///
    /// Every partition of the range is the lower half of one pair, so the
    /// window also covers the partition just above the range — the
    /// off-by-one ownership guard during rebalancing.
    pub fn sliding(range: PartitionRange) -> Self {
        Self {
            pairs: range.iter().map(BoundaryPair::adjacent).collect(),
        }
    }

    /// Iterates the covered pairs.
    pub fn iter(&self) -> impl Iterator<Item = &BoundaryPair> {
        self.pairs.iter()
    }

    /// Number of covered pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pairs are covered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Statuses that expect a downstream task.
    pub statuses: Vec<TransferStatus>,

    /// Task type checked against the journal and re-dispatched.
    pub task_type: TaskType,

    /// Minimum age before a transfer can be reported as an orphan, so
    /// records still mid-dispatch are left alone.
    pub min_age: Duration,

    /// Hard cap on orphans handled per pair per sweep.
    pub limit: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            statuses: vec![TransferStatus::PendingTask],
            task_type: TaskType::new("SEND"),
            min_age: Duration::minutes(10),
            limit: 100,
        }
    }
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orphans journaled and dispatched this sweep.
    pub dispatched: u64,

    /// Orphans already journaled by a concurrent worker; treated as success.
    pub already_recorded: u64,

    /// Dispatch attempts that failed after journaling.
    pub failed: u64,
}

impl ReconcileReport {
    /// Total orphans surfaced by the sweep. Zero is a normal outcome.
    pub fn orphans(&self) -> u64 {
        self.dispatched + self.already_recorded + self.failed
    }
}

/// Anti-joins task-expecting transfers against the journal and re-triggers
/// the missing work.
///
/// The journal is written *before* dispatch, so repeated sweeps converge:
/// once an orphan is journaled it is never surfaced again, whether or not
/// the dispatch itself succeeded.
pub struct AccidentReconciler<S, J, D> {
    store: S,
    journal: J,
    dispatcher: D,
    coverage: ReconcileCoverage,
    config: ReconcileConfig,
}

impl<S, J, D> AccidentReconciler<S, J, D>
where
    S: TransferStore,
    J: TaskJournal,
    D: TaskDispatcher,
{
    /// Creates a reconciler.
    pub fn new(
        store: S,
        journal: J,
        dispatcher: D,
        coverage: ReconcileCoverage,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            journal,
            dispatcher,
            coverage,
            config,
        }
    }

    /// Returns the orphans of one boundary pair, capped at the configured
    /// limit.
    pub async fn orphans(&self, pair: BoundaryPair) -> Result<Vec<TransferKey>> {
        let cutoff = Utc::now() - self.config.min_age;
        let keys = self
            .store
            .find_orphans(OrphanQuery::new(
                self.config.statuses.clone(),
                self.config.task_type.clone(),
                cutoff,
                pair,
                self.config.limit,
            ))
            .await?;
        Ok(keys)
    }

    /// Runs one reconciliation sweep over the configured coverage.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for pair in self.coverage.iter() {
            for key in self.orphans(*pair).await? {
                // Journal first: the entry, not the dispatch, is what stops
                // the next sweep from re-triggering.
                if self
                    .journal
                    .record(key, &self.config.task_type)
                    .await?
                    .is_new()
                {
                    match self.dispatcher.dispatch(key, &self.config.task_type).await {
                        Ok(()) => {
                            report.dispatched += 1;
                            metrics::counter!("reconciler_dispatched_total").increment(1);
                        }
                        Err(e) => {
                            report.failed += 1;
                            metrics::counter!("reconciler_dispatch_failures_total").increment(1);
                            tracing::warn!(%key, error = %e, "orphan dispatch failed after journaling");
                        }
                    }
                } else {
                    report.already_recorded += 1;
                }
            }
        }

        if report.orphans() > 0 {
            tracing::info!(
                dispatched = report.dispatched,
                already_recorded = report.already_recorded,
                failed = report.failed,
                "reconciliation sweep finished"
            );
        }
        Ok(report)
    }
}
