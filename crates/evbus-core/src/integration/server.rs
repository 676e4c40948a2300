//! The sequential receive, handle, acknowledge loop.
//!
//! [`AckLoopServer`] turns an [`AckAdapter`] and a handler into a running
//! consumer. Each iteration:
//!
//! 1. Waits for the next event from the adapter
//! 2. Hands it to the handler on the calling task
//! 3. Acknowledges it once the handler succeeded
//!
//! The first failure in any phase ends the run. The adapter is closed exactly
//! once on the way out and the server becomes [`RunState::Closed`]; running a
//! closed server again fails with [`BusError::AlreadyClosed`].
//!
//! Dropping a run midway (a timeout, an aborted task, a losing `select!`
//! branch) also ends it: the server becomes `Closed` at once and the adapter
//! is closed from a background task, so an unacknowledged event still goes
//! back to its source.
//!
//! An event is only acknowledged after its handler returns, so the handler
//! should finish its work before returning. For parallel consumption run
//! several servers with their own adapters rather than wrapping the handler
//! in an executor that acknowledges early.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{Instrument, Span, info, info_span, trace, warn};

use crate::foundation::context::Context;
use crate::foundation::error::{BusError, BusResult};
use crate::framework::handler::{BoxedHandler, EventHandler};
use crate::integration::adapter::{AckAdapter, BoxedAdapter, HandlerServer};

/// Lifecycle of an [`AckLoopServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, never run.
    Idle,
    /// Inside `run_server`.
    Running,
    /// Terminated; cannot run again.
    Closed,
}

/// Drives one adapter through the receive, handle, acknowledge loop.
pub struct AckLoopServer {
    adapter: Arc<tokio::sync::Mutex<BoxedAdapter>>,
    handler: BoxedHandler,
    state: parking_lot::Mutex<RunState>,
    processed: AtomicU64,
}

impl AckLoopServer {
    /// Creates an idle server.
    pub fn new(adapter: impl AckAdapter + 'static, handler: impl EventHandler + 'static) -> Self {
        Self::from_parts(Box::new(adapter), Arc::new(handler))
    }

    /// Creates an idle server from already boxed parts.
    pub fn from_parts(adapter: BoxedAdapter, handler: BoxedHandler) -> Self {
        Self {
            adapter: Arc::new(tokio::sync::Mutex::new(adapter)),
            handler,
            state: parking_lot::Mutex::new(RunState::Idle),
            processed: AtomicU64::new(0),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Returns how many events were acknowledged.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Runs the loop until a phase fails, then closes the adapter.
    ///
    /// Returns the error that ended the loop, or [`BusError::AlreadyClosed`]
    /// if the server already terminated. A concurrent call waits for the
    /// active run and then gets `AlreadyClosed`.
    pub async fn run(&self, ctx: &Context) -> BusError {
        let mut adapter = self.adapter.lock().await;
        {
            let mut state = self.state.lock();
            if *state == RunState::Closed {
                return BusError::AlreadyClosed;
            }
            *state = RunState::Running;
        }

        let span = info_span!("ack_loop");
        info!(parent: &span, "Server started");
        let mut exit = AbortedRun {
            adapter: &self.adapter,
            state: &self.state,
            span: span.clone(),
            armed: true,
        };

        let err = match self.consume(&mut adapter, ctx).instrument(span.clone()).await {
            Ok(never) => match never {},
            Err(err) => err,
        };

        // closed before the close call, so a drop during it cannot close twice
        *self.state.lock() = RunState::Closed;
        exit.armed = false;
        if let Err(close_err) = adapter.close().await {
            warn!(parent: &span, error = %close_err, "Failed to close adapter");
        }

        info!(
            parent: &span,
            processed = self.processed(),
            reason = %err,
            "Server stopped"
        );
        err
    }

    async fn consume(&self, adapter: &mut BoxedAdapter, ctx: &Context) -> BusResult<Infallible> {
        loop {
            let event = adapter.next_event(ctx).await?;
            trace!(event_type = event.type_name(), "Event received");

            self.handler.handle_event(ctx, event).await?;
            adapter.ack_positive().await?;

            let total = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(processed = total, "Event acknowledged");
        }
    }
}

/// Finishes a run whose future was dropped before the loop ended.
///
/// Declared after the adapter lock in `run`, so it drops first and the
/// background close queues behind the released lock.
struct AbortedRun<'a> {
    adapter: &'a Arc<tokio::sync::Mutex<BoxedAdapter>>,
    state: &'a parking_lot::Mutex<RunState>,
    span: Span,
    armed: bool,
}

impl Drop for AbortedRun<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        *self.state.lock() = RunState::Closed;

        let Ok(handle) = Handle::try_current() else {
            warn!(parent: &self.span, "Server run dropped outside a runtime; adapter not closed");
            return;
        };
        warn!(parent: &self.span, "Server run dropped; closing adapter");
        let adapter = Arc::clone(self.adapter);
        let span = self.span.clone();
        handle.spawn(async move {
            if let Err(err) = adapter.lock().await.close().await {
                warn!(parent: &span, error = %err, "Failed to close adapter");
            }
        });
    }
}

#[async_trait]
impl HandlerServer for AckLoopServer {
    async fn run_server(&self, ctx: &Context) -> BusResult {
        Err(self.run(ctx).await)
    }
}

impl std::fmt::Debug for AckLoopServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckLoopServer")
            .field("state", &self.state())
            .field("processed", &self.processed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::{AdapterError, AdapterResult, ContextError};
    use crate::foundation::event::BoxedEvent;
    use crate::framework::handler::handler_fn;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Serves a fixed list of numbers and records every call.
    struct Scripted {
        events: VecDeque<u32>,
        current: Option<BoxedEvent>,
        log: Log,
        wait_when_empty: bool,
    }

    impl Scripted {
        fn new(events: &[u32], log: &Log) -> Self {
            Self {
                events: events.iter().copied().collect(),
                current: None,
                log: Arc::clone(log),
                wait_when_empty: false,
            }
        }
    }

    #[async_trait]
    impl AckAdapter for Scripted {
        async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent> {
            self.log.lock().push("next".into());
            match self.events.pop_front() {
                Some(n) => {
                    let event = BoxedEvent::new(n);
                    self.current = Some(event.clone());
                    Ok(event)
                }
                None if self.wait_when_empty => Err(ctx.done().await.into()),
                None => Err(AdapterError::Exhausted),
            }
        }

        fn current_event(&self) -> Option<&BoxedEvent> {
            self.current.as_ref()
        }

        async fn ack_positive(&mut self) -> AdapterResult<()> {
            self.log.lock().push("ack".into());
            self.current.take().map(drop).ok_or(AdapterError::NothingToAck)
        }

        async fn close(&mut self) -> AdapterResult<()> {
            self.log.lock().push("close".into());
            self.current = None;
            Ok(())
        }
    }

    fn recording_handler(log: &Log, fail_on: Option<u32>) -> impl EventHandler + 'static {
        let log = Arc::clone(log);
        handler_fn(move |_ctx, event: BoxedEvent| {
            let log = Arc::clone(&log);
            async move {
                let n = *event.downcast_ref::<u32>().unwrap();
                log.lock().push(format!("handle:{n}"));
                if Some(n) == fail_on {
                    return Err(BusError::handler(format!("cannot handle {n}")));
                }
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_loop_order_until_exhausted() {
        let log = Log::default();
        let server = AckLoopServer::new(Scripted::new(&[1, 2, 3], &log), recording_handler(&log, None));
        assert_eq!(server.state(), RunState::Idle);

        let err = server.run_server(&Context::background()).await.unwrap_err();

        assert!(matches!(err, BusError::Adapter(AdapterError::Exhausted)));
        assert_eq!(
            *log.lock(),
            vec![
                "next", "handle:1", "ack", "next", "handle:2", "ack", "next", "handle:3", "ack",
                "next", "close",
            ]
        );
        assert_eq!(server.processed(), 3);
        assert_eq!(server.state(), RunState::Closed);
    }

    #[tokio::test]
    async fn test_handler_failure_stops_without_ack() {
        let log = Log::default();
        let server = AckLoopServer::new(
            Scripted::new(&[1, 2, 3], &log),
            recording_handler(&log, Some(2)),
        );

        let err = server.run_server(&Context::background()).await.unwrap_err();

        assert_eq!(err.to_string(), "handler failed: cannot handle 2");
        assert_eq!(
            *log.lock(),
            vec!["next", "handle:1", "ack", "next", "handle:2", "close"]
        );
        assert_eq!(server.processed(), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_rejected_without_touching_adapter() {
        let log = Log::default();
        let server = AckLoopServer::new(Scripted::new(&[], &log), recording_handler(&log, None));

        let _ = server.run_server(&Context::background()).await;
        let before = log.lock().clone();
        assert_eq!(before, vec!["next", "close"]);

        let err = server.run_server(&Context::background()).await.unwrap_err();
        assert!(matches!(err, BusError::AlreadyClosed));
        assert_eq!(*log.lock(), before);
    }

    #[tokio::test]
    async fn test_context_cancel_ends_loop() {
        let log = Log::default();
        let mut adapter = Scripted::new(&[7], &log);
        adapter.wait_when_empty = true;
        let server = Arc::new(AckLoopServer::new(adapter, recording_handler(&log, None)));
        let ctx = Context::background();

        let running = {
            let server = Arc::clone(&server);
            let ctx = ctx.clone();
            tokio::spawn(async move { server.run_server(&ctx).await })
        };
        while server.processed() < 1 {
            tokio::task::yield_now().await;
        }
        ctx.cancel();

        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
        assert_eq!(
            *log.lock(),
            vec!["next", "handle:7", "ack", "next", "close"]
        );
        assert_eq!(server.state(), RunState::Closed);
    }

    #[tokio::test]
    async fn test_ack_failure_stops_loop() {
        struct NoAck(Scripted);

        #[async_trait]
        impl AckAdapter for NoAck {
            async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent> {
                self.0.next_event(ctx).await
            }
            fn current_event(&self) -> Option<&BoxedEvent> {
                self.0.current_event()
            }
            async fn ack_positive(&mut self) -> AdapterResult<()> {
                Err(AdapterError::ack("broker unavailable"))
            }
            async fn close(&mut self) -> AdapterResult<()> {
                self.0.close().await
            }
        }

        let log = Log::default();
        let server = AckLoopServer::new(
            NoAck(Scripted::new(&[1, 2], &log)),
            recording_handler(&log, None),
        );

        let err = server.run_server(&Context::background()).await.unwrap_err();
        assert!(matches!(err, BusError::Adapter(AdapterError::Ack(_))));
        assert_eq!(*log.lock(), vec!["next", "handle:1", "close"]);
        assert_eq!(server.processed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_closes_adapter_once() {
        let log = Log::default();
        let mut adapter = Scripted::new(&[5], &log);
        adapter.wait_when_empty = true;
        let server = AckLoopServer::new(adapter, recording_handler(&log, None));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            server.run_server(&Context::background()),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(server.state(), RunState::Closed);

        while !log.lock().iter().any(|call| call == "close") {
            tokio::task::yield_now().await;
        }
        assert_eq!(*log.lock(), vec!["next", "handle:5", "ack", "next", "close"]);

        let err = server.run_server(&Context::background()).await.unwrap_err();
        assert!(matches!(err, BusError::AlreadyClosed));
        assert_eq!(*log.lock(), vec!["next", "handle:5", "ack", "next", "close"]);
    }
}
