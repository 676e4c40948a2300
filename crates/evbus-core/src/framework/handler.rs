//! The handler capability.
//!
//! [`EventHandler`] is the one interface every processing stage implements:
//! the [`TypeDispatcher`](crate::TypeDispatcher), the
//! [`ConcurrencyLimitedExecutor`](crate::ConcurrencyLimitedExecutor), and any
//! plain closure wrapped with [`handler_fn`]. Stages therefore nest freely:
//!
//! ```text
//! AckLoopServer ──▶ ConcurrencyLimitedExecutor ──▶ TypeDispatcher ──▶ typed fns
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::foundation::context::Context;
use crate::foundation::error::BusResult;
use crate::foundation::event::BoxedEvent;

/// Something capable of handling events.
///
/// It may be a handler itself or a bus that routes to other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one event.
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        (**self).handle_event(ctx, event).await
    }
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Box<H> {
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        (**self).handle_event(ctx, event).await
    }
}

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn EventHandler>;

/// An [`EventHandler`] backed by a closure over the raw event.
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps a closure `(Context, BoxedEvent) -> Future<Output = BusResult>` as a
/// handler.
///
/// ```rust,ignore
/// let log_all = handler_fn(|_ctx, event: BoxedEvent| async move {
///     tracing::info!(event_type = event.type_name(), "seen");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, BoxedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = BusResult> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Context, BoxedEvent) -> Fut + Send + Sync,
    Fut: Future<Output = BusResult> + Send,
{
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        (self.f)(ctx.clone(), event).await
    }
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}
