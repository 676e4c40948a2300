//! The acknowledging adapter interface.
//!
//! An [`AckAdapter`] is a stateful cursor over an external event source that
//! uses receive-then-acknowledge semantics: an event received with
//! [`next_event`](AckAdapter::next_event) is only considered delivered once
//! [`ack_positive`](AckAdapter::ack_positive) is called. Anything left
//! unacknowledged is the source's to redeliver.
//!
//! Adapters are not shared between tasks. Run one adapter per consumer; the
//! `&mut self` receivers make that explicit.
//!
//! ```rust,ignore
//! struct QueueAdapter { rx: Receiver<Job>, current: Option<BoxedEvent> }
//!
//! #[async_trait]
//! impl AckAdapter for QueueAdapter {
//!     async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent> {
//!         tokio::select! {
//!             job = self.rx.recv() => {
//!                 let event = BoxedEvent::new(job.ok_or(AdapterError::Exhausted)?);
//!                 self.current = Some(event.clone());
//!                 Ok(event)
//!             }
//!             err = ctx.done() => Err(err.into()),
//!         }
//!     }
//!     // ...
//! }
//! ```

use async_trait::async_trait;

use crate::foundation::context::Context;
use crate::foundation::error::{AdapterResult, BusResult};
use crate::foundation::event::BoxedEvent;

/// Receive-and-acknowledge access to an external event source.
#[async_trait]
pub trait AckAdapter: Send {
    /// Requests the next event.
    ///
    /// Must not block past the point where `ctx` is done; in that case the
    /// context error is returned.
    async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent>;

    /// Returns the event currently being processed, if any.
    fn current_event(&self) -> Option<&BoxedEvent>;

    /// Confirms the current event was fully handled so it is not redelivered.
    async fn ack_positive(&mut self) -> AdapterResult<()>;

    /// Releases the adapter and any state tied to the current event.
    async fn close(&mut self) -> AdapterResult<()>;
}

#[async_trait]
impl<A: AckAdapter + ?Sized> AckAdapter for Box<A> {
    async fn next_event(&mut self, ctx: &Context) -> AdapterResult<BoxedEvent> {
        (**self).next_event(ctx).await
    }

    fn current_event(&self) -> Option<&BoxedEvent> {
        (**self).current_event()
    }

    async fn ack_positive(&mut self) -> AdapterResult<()> {
        (**self).ack_positive().await
    }

    async fn close(&mut self) -> AdapterResult<()> {
        (**self).close().await
    }
}

/// An owned, type-erased adapter.
pub type BoxedAdapter = Box<dyn AckAdapter>;

/// A long-running consumer that handles incoming work until its context ends
/// or something fails.
#[async_trait]
pub trait HandlerServer: Send + Sync {
    /// Runs the server to completion and returns why it stopped.
    async fn run_server(&self, ctx: &Context) -> BusResult;
}
