use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::BulkheadError;

/// Bulkhead configuration.
///
/// `max_workers` is an admission-control bound, not an auto-scaling target:
/// at most that many operations run at once, and the cap never grows.
#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    pub max_workers: usize,
}

impl BulkheadConfig {
    /// Creates a configuration with the given worker cap.
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }
}

struct Inner {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity-bounded worker pool for blocking operations.
///
/// All blocking store and journal calls are routed through this component
/// rather than executed directly on the dispatch loop. Saturation queues
/// submissions on the semaphore; that queueing is the backpressure upstream
/// callers observe. Initialization is one-time via [`Bulkhead::start`];
/// [`Bulkhead::shutdown`] drains in-flight work before releasing resources.
#[derive(Clone)]
pub struct Bulkhead {
    inner: Arc<Inner>,
}

impl Bulkhead {
    /// Starts the pool with the given configuration.
    pub fn start(config: BulkheadConfig) -> Result<Self, BulkheadError> {
        if config.max_workers == 0 {
            return Err(BulkheadError::InvalidWorkerCap);
        }
        tracing::info!(max_workers = config.max_workers, "bulkhead started");
        Ok(Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(config.max_workers)),
                max_workers: config.max_workers,
                background: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Number of workers currently free.
    pub fn available_workers(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Executes a blocking operation on the worker pool and returns its
    /// result.
    ///
    /// Queues when the pool is saturated. The permit is held for the full
    /// duration of the operation.
    pub async fn submit<F, T>(&self, op: F) -> Result<T, BulkheadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| BulkheadError::ShutDown)?;
        metrics::counter!("bulkhead_submitted_total").increment(1);

        let handle = tokio::task::spawn_blocking(move || {
            let result = op();
            drop(permit);
            result
        });
        handle
            .await
            .map_err(|e| BulkheadError::WorkerPanic(e.to_string()))
    }

    /// Executes an async operation under a worker permit.
    ///
    /// This bounds the number of concurrently running operations without
    /// moving them off the runtime; sweeps use it so a worker instance never
    /// runs more I/O than the pool allows.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, BulkheadError>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| BulkheadError::ShutDown)?;
        Ok(fut.await)
    }

    /// Spawns a tracked background task.
    ///
    /// Tracked tasks are awaited during [`Bulkhead::shutdown`].
    pub fn schedule_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut background = self.inner.background.lock().unwrap();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Drains in-flight work, then stops admission for good.
    ///
    /// Queued submissions that were admitted before this call still run;
    /// submissions arriving afterwards fail with `ShutDown`.
    pub async fn shutdown(&self) {
        if let Ok(permits) = self
            .inner
            .semaphore
            .acquire_many(self.inner.max_workers as u32)
            .await
        {
            permits.forget();
        }
        self.inner.semaphore.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut background = self.inner.background.lock().unwrap();
            background.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task did not finish cleanly");
            }
        }
        tracing::info!("bulkhead shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn start_rejects_zero_cap() {
        let result = Bulkhead::start(BulkheadConfig::new(0));
        assert!(matches!(result, Err(BulkheadError::InvalidWorkerCap)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_returns_operation_result() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(2)).unwrap();
        let result = bulkhead.submit(|| 21 * 2).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrency_never_exceeds_cap() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(2)).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bulkhead = bulkhead.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                bulkhead
                    .submit(move || {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn run_executes_async_work_under_permit() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(1)).unwrap();
        let value = bulkhead.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(bulkhead.available_workers(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_after_shutdown_is_rejected() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(2)).unwrap();
        bulkhead.shutdown().await;

        let result = bulkhead.submit(|| ()).await;
        assert!(matches!(result, Err(BulkheadError::ShutDown)));

        let result = bulkhead.run(async {}).await;
        assert!(matches!(result, Err(BulkheadError::ShutDown)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_in_flight_work() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(1)).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let worker = {
            let bulkhead = bulkhead.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                bulkhead
                    .submit(move || {
                        std::thread::sleep(Duration::from_millis(50));
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            })
        };
        // Give the submission time to take its permit.
        tokio::time::sleep(Duration::from_millis(10)).await;

        bulkhead.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_awaits_background_tasks() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(2)).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&done);
        bulkhead.schedule_background(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        bulkhead.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn worker_panic_is_reported() {
        let bulkhead = Bulkhead::start(BulkheadConfig::new(1)).unwrap();
        let result: Result<(), _> = bulkhead.submit(|| panic!("boom")).await;
        assert!(matches!(result, Err(BulkheadError::WorkerPanic(_))));

        // The permit is released even after a panic.
        assert_eq!(bulkhead.available_workers(), 1);
    }
}
