//! Consumer groups: several independent ack loops sharing one handler.
//!
//! A [`ConsumerGroup`] starts `workers` [`AckLoopServer`]s, each over its own
//! adapter produced by an [`AdapterFactory`]. Workers are independent: one
//! stopping or failing does not stop the others. The group ends when every
//! worker has ended, usually because the context was cancelled.
//!
//! When the shared handler is a [`ConcurrencyLimitedExecutor`] registered
//! with [`ConsumerGroup::with_executor`], the group closes it after the
//! workers stop and waits up to the shutdown grace period for its background
//! jobs. Note that the executor acknowledges on admission, not on completion.
//!
//! ```rust,ignore
//! let executor = Arc::new(
//!     ConcurrencyLimitedExecutor::builder(dispatcher)
//!         .max_concurrent_jobs(config.executor.max_concurrent_jobs)
//!         .build(),
//! );
//!
//! let report = ConsumerGroup::with_executor(queue.clone(), executor)
//!     .settings(&config.consumers)
//!     .run_until_signal()
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use evbus_core::{
    AckLoopServer, AdapterError, BoxedAdapter, BoxedHandler, BusError, ConcurrencyLimitedExecutor,
    Context, EventHandler,
};
use futures::future::join_all;
use tokio::signal;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ConsumerSettings;
use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::MemoryQueue;

/// Produces one adapter per worker.
pub trait AdapterFactory: Send + Sync {
    /// Creates the adapter for worker number `worker`.
    fn create_adapter(&self, worker: usize) -> Result<BoxedAdapter, AdapterError>;
}

impl<F> AdapterFactory for F
where
    F: Fn(usize) -> Result<BoxedAdapter, AdapterError> + Send + Sync,
{
    fn create_adapter(&self, worker: usize) -> Result<BoxedAdapter, AdapterError> {
        self(worker)
    }
}

impl AdapterFactory for MemoryQueue {
    fn create_adapter(&self, _worker: usize) -> Result<BoxedAdapter, AdapterError> {
        Ok(Box::new(self.adapter()))
    }
}

// =============================================================================
// Reports
// =============================================================================

/// How a worker ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The context ended or the source ran dry.
    Stopped(BusError),
    /// A handler, acknowledgement or adapter failure ended the loop.
    Failed(BusError),
    /// The worker task panicked.
    Panicked(String),
}

impl WorkerOutcome {
    fn from_error(err: BusError) -> Self {
        let orderly = err.context_error().is_some()
            || matches!(
                err,
                BusError::Adapter(AdapterError::Exhausted | AdapterError::Closed)
            );
        if orderly {
            Self::Stopped(err)
        } else {
            Self::Failed(err)
        }
    }

    /// Returns `true` for an orderly stop.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

/// What one worker did.
#[derive(Debug)]
pub struct WorkerReport {
    /// Worker number, starting at 0.
    pub worker: usize,
    /// Events acknowledged by this worker.
    pub processed: u64,
    /// How the worker's loop ended.
    pub outcome: WorkerOutcome,
}

/// Result of running a [`ConsumerGroup`].
#[derive(Debug)]
pub struct GroupReport {
    /// One entry per worker, in worker order.
    pub workers: Vec<WorkerReport>,
    /// Whether the executor finished its background jobs within the grace
    /// period. `None` when no executor was attached.
    pub drained: Option<bool>,
}

impl GroupReport {
    /// Total events acknowledged across workers.
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Workers that did not stop in an orderly way.
    pub fn failures(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| !w.outcome.is_stopped())
    }

    /// Returns `true` if every worker stopped in an orderly way and any
    /// attached executor drained in time.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none() && self.drained != Some(false)
    }
}

// =============================================================================
// ConsumerGroup
// =============================================================================

/// Runs several ack-loop workers over adapters from one factory.
pub struct ConsumerGroup {
    factory: Arc<dyn AdapterFactory>,
    handler: BoxedHandler,
    executor: Option<Arc<ConcurrencyLimitedExecutor>>,
    workers: usize,
    shutdown_grace: Duration,
}

impl ConsumerGroup {
    /// Creates a single-worker group.
    pub fn new(factory: impl AdapterFactory + 'static, handler: impl EventHandler + 'static) -> Self {
        let defaults = ConsumerSettings::default();
        Self {
            factory: Arc::new(factory),
            handler: Arc::new(handler),
            executor: None,
            workers: defaults.workers,
            shutdown_grace: defaults.shutdown_grace(),
        }
    }

    /// Creates a group whose workers feed `executor`, which is drained on
    /// shutdown.
    pub fn with_executor(
        factory: impl AdapterFactory + 'static,
        executor: Arc<ConcurrencyLimitedExecutor>,
    ) -> Self {
        let mut group = Self::new(factory, Arc::clone(&executor));
        group.executor = Some(executor);
        group
    }

    /// Sets the number of workers. At least one worker always runs.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets how long to wait for executor jobs after the workers stopped.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Applies worker count and grace period from configuration.
    pub fn settings(self, settings: &ConsumerSettings) -> Self {
        self.workers(settings.workers)
            .shutdown_grace(settings.shutdown_grace())
    }

    /// Runs every worker until each has ended.
    ///
    /// Fails before starting anything if an adapter cannot be created.
    pub async fn run(&self, ctx: &Context) -> RuntimeResult<GroupReport> {
        let mut servers = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let adapter = self
                .factory
                .create_adapter(worker)
                .map_err(|source| RuntimeError::AdapterSetup { worker, source })?;
            servers.push(Arc::new(AckLoopServer::from_parts(
                adapter,
                Arc::clone(&self.handler),
            )));
        }

        info!(workers = self.workers, "Consumer group started");

        let handles = servers.iter().enumerate().map(|(worker, server)| {
            let server = Arc::clone(server);
            let ctx = ctx.child();
            tokio::spawn(
                async move { server.run(&ctx).await }.instrument(info_span!("worker", id = worker)),
            )
        });
        let results = join_all(handles.collect::<Vec<_>>()).await;

        let mut reports = Vec::with_capacity(results.len());
        for (worker, (server, joined)) in servers.iter().zip(results).enumerate() {
            let outcome = match joined {
                Ok(err) => WorkerOutcome::from_error(err),
                Err(join_err) => WorkerOutcome::Panicked(join_err.to_string()),
            };
            match &outcome {
                WorkerOutcome::Stopped(reason) => {
                    debug!(worker, reason = %reason, "Worker stopped")
                }
                WorkerOutcome::Failed(err) => error!(worker, error = %err, "Worker failed"),
                WorkerOutcome::Panicked(msg) => error!(worker, panic = %msg, "Worker panicked"),
            }
            reports.push(WorkerReport {
                worker,
                processed: server.processed(),
                outcome,
            });
        }

        let drained = match &self.executor {
            Some(executor) => Some(self.drain(executor).await),
            None => None,
        };

        let report = GroupReport {
            workers: reports,
            drained,
        };
        info!(
            processed = report.processed(),
            clean = report.is_clean(),
            "Consumer group stopped"
        );
        Ok(report)
    }

    /// Runs the group until `shutdown` completes, then cancels the workers.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<GroupReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ctx = Context::background();
        let trigger = ctx.clone();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            trigger.cancel();
        });

        let report = self.run(&ctx).await;
        watcher.abort();
        report
    }

    /// Runs the group until Ctrl+C or SIGTERM.
    pub async fn run_until_signal(&self) -> RuntimeResult<GroupReport> {
        info!("Consumer group is running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    async fn drain(&self, executor: &ConcurrencyLimitedExecutor) -> bool {
        executor.close();
        let running = executor.running_jobs();
        if running > 0 {
            info!(running, grace = ?self.shutdown_grace, "Waiting for background jobs");
        }
        match tokio::time::timeout(self.shutdown_grace, executor.wait_idle()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    running = executor.running_jobs(),
                    "Background jobs still running after grace period"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("workers", &self.workers)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => {
            warn!(error = %err, "Failed to listen for Ctrl+C, running until cancelled");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evbus_core::{BoxedEvent, handler_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn fill(queue: &MemoryQueue, n: u32) {
        for i in 0..n {
            queue.push(i).unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_share_queue() {
        let queue = MemoryQueue::new();
        fill(&queue, 20);
        queue.close();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let group = ConsumerGroup::new(
            queue.clone(),
            handler_fn(move |_ctx, _event| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .workers(3);

        let report = group.run(&Context::background()).await.unwrap();

        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.processed(), 20);
        assert_eq!(seen.load(Ordering::SeqCst), 20);
        assert!(report.is_clean());
        assert!(report.drained.is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_worker_is_reported() {
        let queue = MemoryQueue::new();
        fill(&queue, 5);
        queue.close();

        let group = ConsumerGroup::new(
            queue.clone(),
            handler_fn(|_ctx, event: BoxedEvent| async move {
                match event.downcast_ref::<u32>() {
                    Some(&3) => Err(BusError::handler("cannot process 3")),
                    _ => Ok(()),
                }
            }),
        );

        let report = group.run(&Context::background()).await.unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.processed(), 3);
        let failed: Vec<_> = report.failures().map(|w| w.worker).collect();
        assert_eq!(failed, vec![0]);
        assert!(matches!(report.workers[0].outcome, WorkerOutcome::Failed(_)));
        // the failed event and the one behind it are still queued
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_run_until_cancels_and_drains_executor() {
        let queue = MemoryQueue::new();
        fill(&queue, 4);

        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let executor = Arc::new(
            ConcurrencyLimitedExecutor::builder(handler_fn(move |_ctx, _event| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
            .max_concurrent_jobs(2)
            .build(),
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let done = Arc::clone(&finished);
        tokio::spawn(async move {
            while done.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = stop_tx.send(());
        });

        let group = ConsumerGroup::with_executor(queue.clone(), Arc::clone(&executor))
            .workers(2)
            .shutdown_grace(Duration::from_secs(5));
        let report = group
            .run_until(async move {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.drained, Some(true));
        assert_eq!(report.processed(), 4);
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert!(executor.is_closed());
        for worker in &report.workers {
            match &worker.outcome {
                WorkerOutcome::Stopped(err) => assert!(err.context_error().is_some()),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_adapter_setup_failure() {
        let group = ConsumerGroup::new(
            |worker: usize| -> Result<BoxedAdapter, AdapterError> {
                Err(AdapterError::internal(format!("no broker for {worker}")))
            },
            handler_fn(|_ctx, _event| async { Ok(()) }),
        )
        .workers(2);

        let err = group.run(&Context::background()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AdapterSetup { worker: 0, .. }));
    }

    #[test]
    fn test_settings_apply() {
        let settings = ConsumerSettings {
            workers: 0,
            shutdown_grace_ms: 250,
        };
        let group = ConsumerGroup::new(
            MemoryQueue::new(),
            handler_fn(|_ctx, _event| async { Ok(()) }),
        )
        .settings(&settings);

        assert_eq!(group.workers, 1);
        assert_eq!(group.shutdown_grace, Duration::from_millis(250));
    }
}
