//! In-process event queue with at-least-once delivery.
//!
//! [`MemoryQueue`] is a shared FIFO of events. Each [`MemoryAdapter`] taken
//! from it is an independent consumer cursor implementing [`AckAdapter`]:
//! an event stays owned by the adapter that received it until it is
//! acknowledged, and goes back to the front of the queue if the adapter is
//! closed or moves on without acknowledging it.
//!
//! ```rust,ignore
//! let queue = MemoryQueue::new();
//! queue.push(OrderPlaced { id: 7 })?;
//!
//! let server = AckLoopServer::new(queue.adapter(), dispatcher);
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use evbus_core::{AckAdapter, AdapterError, AdapterResult, BoxedEvent, Context};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

struct Shared {
    items: Mutex<VecDeque<BoxedEvent>>,
    available: Notify,
    closed: AtomicBool,
    redelivered: AtomicU64,
}

impl Shared {
    fn requeue(&self, event: BoxedEvent) {
        trace!(event_type = event.type_name(), "Event returned for redelivery");
        self.items.lock().push_front(event);
        self.redelivered.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }
}

/// A shared in-process event queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                closed: AtomicBool::new(false),
                redelivered: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues an event.
    pub fn push<E: Any + Send + Sync>(&self, event: E) -> AdapterResult<()> {
        self.push_event(BoxedEvent::new(event))
    }

    /// Enqueues an already boxed event.
    ///
    /// Fails with [`AdapterError::Closed`] once the queue is closed.
    pub fn push_event(&self, event: BoxedEvent) -> AdapterResult<()> {
        if self.is_closed() {
            return Err(AdapterError::Closed);
        }
        self.shared.items.lock().push_back(event);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stops accepting events. Adapters drain what is left and then report
    /// [`AdapterError::Exhausted`].
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!(pending = self.len(), "Memory queue closed");
            self.shared.available.notify_waiters();
        }
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Returns the number of events waiting for delivery.
    pub fn len(&self) -> usize {
        self.shared.items.lock().len()
    }

    /// Returns `true` if no event is waiting for delivery.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many events were put back after not being acknowledged.
    pub fn redelivered(&self) -> u64 {
        self.shared.redelivered.load(Ordering::Relaxed)
    }

    /// Creates a new consumer cursor over this queue.
    pub fn adapter(&self) -> MemoryAdapter {
        MemoryAdapter {
            shared: Arc::clone(&self.shared),
            current: None,
            closed: false,
        }
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer cursor over a [`MemoryQueue`].
#[derive(Debug)]
pub struct MemoryAdapter {
    shared: Arc<Shared>,
    current: Option<BoxedEvent>,
    closed: bool,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

#[async_trait]
impl AckAdapter for MemoryAdapter {
    async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent> {
        if self.closed {
            return Err(AdapterError::Closed);
        }
        if let Some(unacked) = self.current.take() {
            self.shared.requeue(unacked);
        }

        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }

            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self.shared.items.lock().pop_front();
            if let Some(event) = next {
                self.current = Some(event.clone());
                return Ok(event);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(AdapterError::Exhausted);
            }

            tokio::select! {
                _ = &mut notified => {}
                err = ctx.done() => return Err(err.into()),
            }
        }
    }

    fn current_event(&self) -> Option<&BoxedEvent> {
        self.current.as_ref()
    }

    async fn ack_positive(&mut self) -> AdapterResult<()> {
        if self.closed {
            return Err(AdapterError::Closed);
        }
        self.current
            .take()
            .map(|event| trace!(event_type = event.type_name(), "Event acknowledged"))
            .ok_or(AdapterError::NothingToAck)
    }

    async fn close(&mut self) -> AdapterResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(unacked) = self.current.take() {
            self.shared.requeue(unacked);
        }
        Ok(())
    }
}
