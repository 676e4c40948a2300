//! Concurrency-limited execution of handlers.
//!
//! [`ConcurrencyLimitedExecutor`] wraps any [`EventHandler`] and runs each
//! admitted event as a detached tokio task. At most `max_concurrent_jobs`
//! tasks run at once (`0` means unlimited).
//!
//! # Admission
//!
//! With a limit, `handle_event` waits for a free slot while racing the
//! caller's context:
//!
//! - slot first: the job is spawned and `Ok(())` is returned
//! - context first: the pending admission is dropped, so it can never admit
//!   late, and the context error is returned
//! - both ready at once: admission wins and `Ok(())` is returned even though
//!   the context is done
//!
//! The caller's context only gates admission. Admitted jobs run against the
//! executor's background context and are never cancelled by the caller.
//!
//! # Errors
//!
//! Failures of admitted jobs never reach the caller of `handle_event`. They
//! go to the `on_error` callback, or to the log when none is configured.
//!
//! ```rust,ignore
//! let executor = ConcurrencyLimitedExecutor::builder(dispatcher)
//!     .max_concurrent_jobs(8)
//!     .on_error(|_ctx, event, err| tracing::error!(event_type = event.type_name(), %err))
//!     .build();
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use crate::foundation::context::Context;
use crate::foundation::error::{BusError, BusResult};
use crate::foundation::event::BoxedEvent;
use crate::framework::handler::{BoxedHandler, EventHandler};

/// Callback receiving failures of admitted jobs.
pub type ErrorCallback = Arc<dyn Fn(&Context, &BoxedEvent, &BusError) + Send + Sync>;

/// Configuration of a [`ConcurrencyLimitedExecutor`].
#[derive(Clone)]
pub struct ExecutorConfig {
    /// The wrapped handler.
    pub handler: BoxedHandler,
    /// Maximum number of simultaneously running jobs, `0` for unlimited.
    pub max_concurrent_jobs: usize,
    /// Context admitted jobs run against.
    pub background: Context,
    /// Receives failures of admitted jobs.
    pub on_error: Option<ErrorCallback>,
}

impl ExecutorConfig {
    /// Creates an unlimited configuration for `handler`.
    pub fn new(handler: impl EventHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            max_concurrent_jobs: 0,
            background: Context::background(),
            on_error: None,
        }
    }
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("has_on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Slot accounting shared by the executor and its running jobs.
struct Slots {
    limit: usize,
    /// `None` when unlimited.
    semaphore: Option<Arc<Semaphore>>,
    running: AtomicUsize,
    closed: AtomicBool,
    idle: Notify,
}

impl Slots {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            semaphore: (limit > 0).then(|| Arc::new(Semaphore::new(limit))),
            running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }
}

/// Held by a running job; releases its slot when the job ends or panics.
struct JobGuard {
    slots: Arc<Slots>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        // the permit field drops after this, so the count is already down
        // when the next waiter is admitted
        if self.slots.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slots.idle.notify_waiters();
        }
    }
}

/// Runs a wrapped handler in background tasks, bounding how many run at once.
pub struct ConcurrencyLimitedExecutor {
    config: ExecutorConfig,
    slots: OnceLock<Arc<Slots>>,
}

impl ConcurrencyLimitedExecutor {
    /// Creates an executor that still has to be [initialized](Self::initialize).
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            slots: OnceLock::new(),
        }
    }

    /// Starts building an initialized executor around `handler`.
    pub fn builder(handler: impl EventHandler + 'static) -> ExecutorBuilder {
        ExecutorBuilder {
            config: ExecutorConfig::new(handler),
        }
    }

    /// Sets up the slot accounting. Must be called exactly once.
    pub fn initialize(&self) -> BusResult {
        let limit = self.limit();
        self.slots
            .set(Arc::new(Slots::new(limit)))
            .map_err(|_| BusError::AlreadyInitialized)?;

        debug!(max_concurrent_jobs = limit, "Executor initialized");
        Ok(())
    }

    /// Returns the effective limit, `0` meaning unlimited.
    ///
    /// Configured values above [`Semaphore::MAX_PERMITS`] are clamped to it.
    pub fn limit(&self) -> usize {
        self.config.max_concurrent_jobs.min(Semaphore::MAX_PERMITS)
    }

    /// Returns the number of admitted jobs that have not finished yet.
    pub fn running_jobs(&self) -> usize {
        self.slots
            .get()
            .map_or(0, |slots| slots.running.load(Ordering::Acquire))
    }

    /// Stops admitting new jobs. Running jobs are left to finish.
    pub fn close(&self) {
        if let Some(slots) = self.slots.get() {
            slots.closed.store(true, Ordering::Release);
            if let Some(semaphore) = &slots.semaphore {
                semaphore.close();
            }
            debug!("Executor closed");
        }
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.slots
            .get()
            .is_some_and(|slots| slots.closed.load(Ordering::Acquire))
    }

    /// Waits until no admitted job is running.
    pub async fn wait_idle(&self) {
        let Some(slots) = self.slots.get() else {
            return;
        };
        loop {
            let notified = slots.idle.notified();
            tokio::pin!(notified);
            // register before checking so a completion in between is not lost
            notified.as_mut().enable();
            if slots.running.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn admit(&self, slots: &Arc<Slots>, ctx: &Context) -> BusResult<Option<OwnedSemaphorePermit>> {
        if slots.closed.load(Ordering::Acquire) {
            return Err(BusError::ExecutorClosed);
        }
        let Some(semaphore) = &slots.semaphore else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            permit = Arc::clone(semaphore).acquire_owned() => {
                permit.map(Some).map_err(|_| BusError::ExecutorClosed)
            }
            err = ctx.done() => {
                trace!(error = %err, limit = slots.limit, "Admission interrupted by context");
                Err(err.into())
            }
        }
    }

    fn spawn_job(&self, slots: &Arc<Slots>, permit: Option<OwnedSemaphorePermit>, event: BoxedEvent) {
        slots.running.fetch_add(1, Ordering::AcqRel);
        let guard = JobGuard {
            slots: Arc::clone(slots),
            _permit: permit,
        };

        let handler = Arc::clone(&self.config.handler);
        let background = self.config.background.clone();
        let on_error = self.config.on_error.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = handler.handle_event(&background, event.clone()).await {
                match on_error {
                    Some(callback) => callback(&background, &event, &err),
                    None => warn!(
                        event_type = event.type_name(),
                        error = %err,
                        "Background job failed"
                    ),
                }
            }
        });
    }
}

#[async_trait]
impl EventHandler for ConcurrencyLimitedExecutor {
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        let slots = self.slots.get().ok_or(BusError::NotInitialized)?;
        let permit = self.admit(slots, ctx).await?;

        trace!(
            event_type = event.type_name(),
            running = slots.running.load(Ordering::Relaxed),
            "Job admitted"
        );
        self.spawn_job(slots, permit, event);
        Ok(())
    }
}

impl std::fmt::Debug for ConcurrencyLimitedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimitedExecutor")
            .field("limit", &self.limit())
            .field("running_jobs", &self.running_jobs())
            .field("initialized", &self.slots.get().is_some())
            .finish()
    }
}

/// Builder for an initialized [`ConcurrencyLimitedExecutor`].
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    /// Sets the maximum number of simultaneously running jobs, `0` for unlimited.
    pub fn max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.config.max_concurrent_jobs = limit;
        self
    }

    /// Sets the context admitted jobs run against.
    pub fn background_context(mut self, ctx: Context) -> Self {
        self.config.background = ctx;
        self
    }

    /// Sets the callback receiving failures of admitted jobs.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Context, &BoxedEvent, &BusError) + Send + Sync + 'static,
    {
        self.config.on_error = Some(Arc::new(callback));
        self
    }

    /// Builds the executor with its slot accounting in place.
    pub fn build(self) -> ConcurrencyLimitedExecutor {
        let executor = ConcurrencyLimitedExecutor::new(self.config);
        let slots = Arc::new(Slots::new(executor.limit()));
        executor.slots.get_or_init(|| slots);
        executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::ContextError;
    use crate::framework::handler::handler_fn;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Handler whose jobs block until the test adds permits to `gate`.
    #[derive(Clone)]
    struct Gated {
        gate: Arc<Semaphore>,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    impl Default for Gated {
        fn default() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                current: Arc::default(),
                peak: Arc::default(),
                started: Arc::default(),
                finished: Arc::default(),
            }
        }
    }

    impl Gated {
        fn handler(&self) -> impl EventHandler + 'static {
            let this = self.clone();
            handler_fn(move |_ctx, _event| {
                let this = this.clone();
                async move {
                    this.started.fetch_add(1, Ordering::SeqCst);
                    let now = this.current.fetch_add(1, Ordering::SeqCst) + 1;
                    this.peak.fetch_max(now, Ordering::SeqCst);
                    this.gate.acquire().await.unwrap().forget();
                    this.current.fetch_sub(1, Ordering::SeqCst);
                    this.finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        }
    }

    async fn wait_for(count: &AtomicUsize, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_initialize_only_once() {
        let executor = ConcurrencyLimitedExecutor::new(ExecutorConfig::new(handler_fn(
            |_ctx, _event| async { Ok(()) },
        )));

        let err = executor
            .handle_event(&Context::background(), BoxedEvent::new(1u8))
            .await;
        assert!(matches!(err, Err(BusError::NotInitialized)));

        assert_ok!(executor.initialize());
        assert!(matches!(
            executor.initialize(),
            Err(BusError::AlreadyInitialized)
        ));

        let built = ConcurrencyLimitedExecutor::builder(handler_fn(|_ctx, _event| async { Ok(()) }))
            .build();
        assert!(matches!(built.initialize(), Err(BusError::AlreadyInitialized)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_limit() {
        let gated = Gated::default();
        let executor = Arc::new(
            ConcurrencyLimitedExecutor::builder(gated.handler())
                .max_concurrent_jobs(2)
                .build(),
        );

        let mut calls = Vec::new();
        for i in 0..6u32 {
            let executor = Arc::clone(&executor);
            calls.push(tokio::spawn(async move {
                executor
                    .handle_event(&Context::background(), BoxedEvent::new(i))
                    .await
            }));
        }

        wait_for(&gated.started, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gated.started.load(Ordering::SeqCst), 2);
        assert_eq!(executor.running_jobs(), 2);

        gated.gate.add_permits(6);
        for call in calls {
            assert_ok!(call.await.unwrap());
        }
        executor.wait_idle().await;

        assert_eq!(gated.finished.load(Ordering::SeqCst), 6);
        assert_eq!(gated.peak.load(Ordering::SeqCst), 2);
        assert_eq!(executor.running_jobs(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let gated = Gated::default();
        let executor = ConcurrencyLimitedExecutor::builder(gated.handler()).build();
        let ctx = Context::background();

        for i in 0..10u32 {
            let admitted = tokio::time::timeout(
                Duration::from_millis(100),
                executor.handle_event(&ctx, BoxedEvent::new(i)),
            )
            .await
            .expect("unlimited admission blocked");
            assert_ok!(admitted);
        }
        assert_eq!(executor.running_jobs(), 10);

        gated.gate.add_permits(10);
        executor.wait_idle().await;
        assert_eq!(gated.finished.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_slot_frees() {
        let gated = Gated::default();
        let executor = ConcurrencyLimitedExecutor::builder(gated.handler())
            .max_concurrent_jobs(1)
            .build();

        assert_ok!(
            executor
                .handle_event(&Context::background(), BoxedEvent::new(1u32))
                .await
        );
        wait_for(&gated.started, 1).await;

        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let err = assert_err!(executor.handle_event(&ctx, BoxedEvent::new(2u32)).await);
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));

        gated.gate.add_permits(2);
        executor.wait_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the interrupted call never got a slot, so its job never ran
        assert_eq!(gated.started.load(Ordering::SeqCst), 1);
        assert_eq!(gated.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admission_wins_over_done_context() {
        let gated = Gated::default();
        let executor = ConcurrencyLimitedExecutor::builder(gated.handler())
            .max_concurrent_jobs(1)
            .build();
        let ctx = Context::background();
        ctx.cancel();

        assert_ok!(executor.handle_event(&ctx, BoxedEvent::new(1u32)).await);

        gated.gate.add_permits(1);
        executor.wait_idle().await;
        assert_eq!(gated.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancel_does_not_stop_running_job() {
        let gated = Gated::default();
        let executor = ConcurrencyLimitedExecutor::builder(gated.handler())
            .max_concurrent_jobs(1)
            .build();
        let ctx = Context::background();

        assert_ok!(executor.handle_event(&ctx, BoxedEvent::new(1u32)).await);
        wait_for(&gated.started, 1).await;
        ctx.cancel();

        gated.gate.add_permits(1);
        executor.wait_idle().await;
        assert_eq!(gated.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_go_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let executor = ConcurrencyLimitedExecutor::builder(handler_fn(|_ctx, _event| async {
            Err(BusError::handler("disk full"))
        }))
        .max_concurrent_jobs(3)
        .on_error(move |_ctx, event, err| {
            sink.lock()
                .push(format!("{}: {err}", event.downcast_ref::<&str>().unwrap()));
        })
        .build();

        assert_ok!(
            executor
                .handle_event(&Context::background(), BoxedEvent::new("job-1"))
                .await
        );
        executor.wait_idle().await;

        assert_eq!(*seen.lock(), vec!["job-1: handler failed: disk full"]);
    }

    #[tokio::test]
    async fn test_background_context_is_used() {
        let background = Context::background();
        background.cancel();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let executor = ConcurrencyLimitedExecutor::builder(handler_fn(move |ctx, _event| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(ctx.is_done(), Ordering::SeqCst);
                Ok(())
            }
        }))
        .background_context(background)
        .build();

        assert_ok!(
            executor
                .handle_event(&Context::background(), BoxedEvent::new(()))
                .await
        );
        executor.wait_idle().await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_closed_executor_rejects() {
        let gated = Gated::default();
        let executor = ConcurrencyLimitedExecutor::builder(gated.handler())
            .max_concurrent_jobs(1)
            .build();
        executor.close();

        assert!(executor.is_closed());
        let err = executor
            .handle_event(&Context::background(), BoxedEvent::new(1u32))
            .await;
        assert!(matches!(err, Err(BusError::ExecutorClosed)));
        assert_eq!(gated.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_releases_slot() {
        let executor = ConcurrencyLimitedExecutor::builder(handler_fn(|_ctx, event: BoxedEvent| async move {
            if event.is::<&str>() {
                panic!("job blew up");
            }
            Ok(())
        }))
        .max_concurrent_jobs(1)
        .build();
        let ctx = Context::background();

        assert_ok!(executor.handle_event(&ctx, BoxedEvent::new("boom")).await);
        executor.wait_idle().await;
        assert_eq!(executor.running_jobs(), 0);

        let second = tokio::time::timeout(
            Duration::from_secs(1),
            executor.handle_event(&ctx, BoxedEvent::new(2u32)),
        )
        .await
        .expect("slot was not released by the panicked job");
        assert_ok!(second);
        executor.wait_idle().await;
    }

    #[test]
    fn test_limit_is_clamped() {
        let executor = ConcurrencyLimitedExecutor::builder(handler_fn(|_ctx, _event| async { Ok(()) }))
            .max_concurrent_jobs(usize::MAX)
            .build();
        assert_eq!(executor.limit(), Semaphore::MAX_PERMITS);

        let unlimited = ConcurrencyLimitedExecutor::builder(handler_fn(|_ctx, _event| async { Ok(()) }))
            .build();
        assert_eq!(unlimited.limit(), 0);
    }
}
