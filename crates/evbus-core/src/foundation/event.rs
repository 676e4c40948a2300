//! Event system for evbus.
//!
//! Events are plain Rust values of any `'static` type. They travel through the
//! bus type-erased as [`BoxedEvent`] and are recovered on the handler side
//! through [`FromEvent`]:
//!
//! - `Arc<T>` extracts events whose concrete type is exactly `T`
//! - [`BoxedEvent`] extracts every event (catch-all)
//! - user types implement [`FromEvent`] to accept a family of events, for
//!   example an enum over several concrete types or a wrapper around a
//!   shared capability trait object
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use evbus_core::{BoxedEvent, FromEvent};
//!
//! trait Billable: Send + Sync {
//!     fn amount(&self) -> u64;
//! }
//!
//! struct AnyBillable(Arc<dyn Billable>);
//!
//! impl FromEvent for AnyBillable {
//!     fn from_event(event: &BoxedEvent) -> Option<Self> {
//!         if let Some(order) = event.downcast_arc::<Order>() {
//!             return Some(Self(order));
//!         }
//!         event.downcast_arc::<Refund>().map(|r| Self(r as Arc<dyn Billable>))
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

/// A type-erased, cheaply clonable event value.
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl BoxedEvent {
    /// Wraps an event value.
    ///
    /// Wrapping a `BoxedEvent` returns it unchanged instead of nesting it.
    pub fn new<E: Any + Send + Sync>(event: E) -> Self {
        if let Some(boxed) = (&event as &dyn Any).downcast_ref::<BoxedEvent>() {
            return boxed.clone();
        }
        Self::from_arc(Arc::new(event))
    }

    /// Wraps an event that is already shared.
    pub fn from_arc<E: Any + Send + Sync>(event: Arc<E>) -> Self {
        Self {
            inner: event,
            type_name: std::any::type_name::<E>(),
        }
    }

    /// Returns the concrete type name of the wrapped event.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the [`TypeId`] of the wrapped event.
    pub fn event_type_id(&self) -> TypeId {
        (*self.inner).type_id()
    }

    /// Returns `true` if the wrapped event is exactly an `E`.
    pub fn is<E: Any>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Borrows the wrapped event as `E`.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.inner.downcast_ref()
    }

    /// Returns a shared handle to the wrapped event as `E`.
    pub fn downcast_arc<E: Any + Send + Sync>(&self) -> Option<Arc<E>> {
        Arc::clone(&self.inner).downcast::<E>().ok()
    }
}

impl std::fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Extraction of a typed view from a type-erased event.
///
/// Returning `None` means "this event is not for me"; the dispatcher then
/// tries the next registration.
pub trait FromEvent: Sized + Send + 'static {
    /// Attempts to extract `Self` from the event.
    fn from_event(event: &BoxedEvent) -> Option<Self>;
}

impl<E: Any + Send + Sync> FromEvent for Arc<E> {
    fn from_event(event: &BoxedEvent) -> Option<Self> {
        event.downcast_arc()
    }
}

impl FromEvent for BoxedEvent {
    fn from_event(event: &BoxedEvent) -> Option<Self> {
        Some(event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    struct Pong;

    #[test]
    fn test_downcast_exact_type() {
        let event = BoxedEvent::new(Ping(7));

        assert!(event.is::<Ping>());
        assert!(!event.is::<Pong>());
        assert_eq!(event.downcast_ref::<Ping>(), Some(&Ping(7)));
        assert_eq!(event.event_type_id(), TypeId::of::<Ping>());
        assert!(event.type_name().ends_with("Ping"));
    }

    #[test]
    fn test_boxing_a_boxed_event_does_not_nest() {
        let event = BoxedEvent::new(Ping(1));
        let again = BoxedEvent::new(event.clone());

        assert!(again.is::<Ping>());
        assert_eq!(again.type_name(), event.type_name());
    }

    #[test]
    fn test_from_event_impls() {
        let event = BoxedEvent::new(Ping(3));

        let ping = <Arc<Ping>>::from_event(&event).unwrap();
        assert_eq!(*ping, Ping(3));
        assert!(<Arc<Pong>>::from_event(&event).is_none());
        assert!(BoxedEvent::from_event(&event).is_some());
    }
}
