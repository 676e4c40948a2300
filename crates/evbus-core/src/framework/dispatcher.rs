//! Type-based event dispatcher.
//!
//! The [`TypeDispatcher`] holds an ordered list of typed handler
//! registrations. When an event is dispatched:
//!
//! 1. Registrations are checked in registration order
//! 2. The first one whose event parameter extracts from the event runs
//! 3. Its result is returned; no further registration is consulted
//!
//! If nothing matches, dispatch fails with
//! [`HandlerNotFound`](crate::HandlerNotFound) carrying the event.
//!
//! ```rust,ignore
//! use evbus_core::{Context, TypeDispatcher};
//!
//! let dispatcher = TypeDispatcher::builder()
//!     .on(|_ctx: Context, order: Arc<OrderPlaced>| async move {
//!         println!("order {}", order.id);
//!         Ok::<_, anyhow::Error>(())
//!     })
//!     .on(audit_everything) // (Context, BoxedEvent) catch-all
//!     .build()?;
//!
//! dispatcher.dispatch(&Context::background(), BoxedEvent::new(order)).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, debug_span, trace};

use crate::foundation::context::Context;
use crate::foundation::error::{BusResult, HandlerNotFound, RegistrationError};
use crate::foundation::event::BoxedEvent;
use crate::framework::handler::EventHandler;
use crate::framework::registration::{EventFn, Registration, Route};

/// Routes events to the first registration that accepts their type.
///
/// Every registration is validated when the dispatcher is built, so an
/// existing dispatcher never holds a malformed handler.
///
/// # Thread Safety
///
/// `TypeDispatcher` is `Send + Sync` and cheap to clone; clones share the
/// same registration list.
#[derive(Clone)]
pub struct TypeDispatcher {
    routes: Arc<[Route]>,
}

impl Default for TypeDispatcher {
    fn default() -> Self {
        Self {
            routes: Arc::from(Vec::new()),
        }
    }
}

impl TypeDispatcher {
    /// Starts building a dispatcher.
    pub fn builder() -> TypeDispatcherBuilder {
        TypeDispatcherBuilder::new()
    }

    /// Builds a dispatcher from registrations, validating each in order.
    pub fn from_registrations<I>(registrations: I) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = Registration>,
    {
        let routes = registrations
            .into_iter()
            .enumerate()
            .map(|(index, reg)| reg.resolve(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            routes: routes.into(),
        })
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches an event to the first matching registration.
    ///
    /// The handler runs inline on the calling task.
    pub async fn dispatch(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        let span = debug_span!("dispatch", event_type = event.type_name());

        for (index, route) in self.routes.iter().enumerate() {
            if let Some(fut) = (route.invoke)(ctx, &event) {
                trace!(
                    parent: &span,
                    registration = index,
                    param = route.signature.event_type_name().unwrap_or("?"),
                    "Registration matched"
                );
                return fut.instrument(span).await;
            }
        }

        trace!(parent: &span, "No registration matched");
        Err(HandlerNotFound { event }.into())
    }
}

#[async_trait]
impl EventHandler for TypeDispatcher {
    async fn handle_event(&self, ctx: &Context, event: BoxedEvent) -> BusResult {
        self.dispatch(ctx, event).await
    }
}

impl std::fmt::Debug for TypeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDispatcher")
            .field("registrations", &self.routes.len())
            .finish()
    }
}

/// Collects registrations in order and validates them on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TypeDispatcherBuilder {
    registrations: Vec<Registration>,
}

impl TypeDispatcherBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Appends a typed handler.
    pub fn on<F, Args>(mut self, handler: F) -> Self
    where
        F: EventFn<Args>,
        Args: 'static,
    {
        self.registrations.push(Registration::new(handler));
        self
    }

    /// Appends a pre-built registration.
    pub fn register(mut self, registration: Registration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Validates every registration and builds the dispatcher.
    pub fn build(self) -> Result<TypeDispatcher, RegistrationError> {
        TypeDispatcher::from_registrations(self.registrations)
    }
}
