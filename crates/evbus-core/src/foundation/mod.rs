//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of evbus:
//! - Execution context with cancellation and deadlines
//! - Type-erased events with runtime downcasting
//! - The error taxonomy shared by every component

pub mod context;
pub mod error;
pub mod event;

pub use context::Context;
pub use error::{
    AdapterError, AdapterResult, BoxError, BusError, BusResult, ContextError, HandlerNotFound,
    RegistrationError,
};
pub use event::{BoxedEvent, FromEvent};
