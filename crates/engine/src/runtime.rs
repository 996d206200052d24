//! Periodic sweep runtime.
//!
//! One tokio task per sweep, each scoped to the worker's partition range,
//! each bounded by a time budget and executed under the bulkhead's
//! admission control. A sweep that overruns its budget is abandoned and
//! resumed on the next cycle; that is safe because every row-level update
//! the sweeps perform is independently idempotent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulkhead::Bulkhead;
use common::PartitionRange;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use transfer_store::{TaskJournal, TransferStore};

use crate::error::Result;
use crate::outbox::{BrokerPublisher, OutboxPublisher};
use crate::reconcile::{AccidentReconciler, TaskDispatcher};
use crate::retry::{RetryHandler, RetryScheduler};

/// Intervals and time budget of the periodic sweeps.
#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    pub outbox_every: Duration,
    pub retry_every: Duration,
    pub reconcile_every: Duration,

    /// Budget per sweep invocation; an overrunning sweep is abandoned.
    pub budget: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            outbox_every: Duration::from_secs(5),
            retry_every: Duration::from_secs(10),
            reconcile_every: Duration::from_secs(60),
            budget: Duration::from_secs(30),
        }
    }
}

/// Owns the periodic sweep loops of one worker instance.
///
/// Wiring is explicit: the caller constructs the components and hands them
/// over; there is no container and no global scheduler.
pub struct EngineRuntime {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Starts the outbox, retry and reconciliation loops.
    pub fn start<S, B, H, J, D>(
        outbox: Arc<OutboxPublisher<S, B>>,
        retry: Arc<RetryScheduler<S, H>>,
        reconciler: Arc<AccidentReconciler<S, J, D>>,
        bulkhead: Bulkhead,
        range: PartitionRange,
        schedule: SweepSchedule,
    ) -> Self
    where
        S: TransferStore + 'static,
        B: BrokerPublisher + 'static,
        H: RetryHandler + 'static,
        J: TaskJournal + 'static,
        D: TaskDispatcher + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        tracing::info!(range = %range, "engine runtime starting");

        let handles = vec![
            spawn_sweep_loop(
                "outbox",
                schedule.outbox_every,
                schedule.budget,
                bulkhead.clone(),
                rx.clone(),
                move || {
                    let outbox = Arc::clone(&outbox);
                    async move { outbox.sweep(range).await.map(|_| ()) }
                },
            ),
            spawn_sweep_loop(
                "retry",
                schedule.retry_every,
                schedule.budget,
                bulkhead.clone(),
                rx.clone(),
                move || {
                    let retry = Arc::clone(&retry);
                    async move { retry.sweep(range).await.map(|_| ()) }
                },
            ),
            spawn_sweep_loop(
                "reconcile",
                schedule.reconcile_every,
                schedule.budget,
                bulkhead,
                rx,
                move || {
                    let reconciler = Arc::clone(&reconciler);
                    async move { reconciler.sweep().await.map(|_| ()) }
                },
            ),
        ];

        Self { shutdown, handles }
    }

    /// Signals the loops to stop and waits for them to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "sweep loop did not finish cleanly");
            }
        }
        tracing::info!("engine runtime stopped");
    }
}

fn spawn_sweep_loop<F, Fut>(
    name: &'static str,
    every: Duration,
    budget: Duration,
    bulkhead: Bulkhead,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(budget, bulkhead.run(sweep())).await {
                        Ok(Ok(Ok(()))) => {}
                        Ok(Ok(Err(e))) => {
                            // Transient by classification: the cycle aborts,
                            // the next one retries.
                            tracing::warn!(sweep = name, error = %e, "sweep failed");
                            metrics::counter!("sweep_failures_total", "sweep" => name).increment(1);
                        }
                        Ok(Err(_)) => {
                            tracing::info!(sweep = name, "bulkhead shut down, stopping loop");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(sweep = name, "sweep exceeded its budget, abandoned until next cycle");
                            metrics::counter!("sweep_abandoned_total", "sweep" => name).increment(1);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(sweep = name, "sweep loop exited");
    })
}
