//! Framework layer - Event processing and routing.
//!
//! This module contains the processing pipeline:
//! - The [`EventHandler`] capability every stage implements
//! - Typed handler registrations with eager shape validation
//! - First-match dispatch by runtime event type
//! - Bounded background execution of a wrapped handler

pub mod dispatcher;
pub mod executor;
pub mod handler;
pub mod registration;

pub use dispatcher::{TypeDispatcher, TypeDispatcherBuilder};
pub use executor::{ConcurrencyLimitedExecutor, ErrorCallback, ExecutorBuilder, ExecutorConfig};
pub use handler::{BoxedHandler, EventHandler, HandlerFn, handler_fn};
pub use registration::{
    EventFn, HandlerParam, HandlerReturn, ParamInfo, ParamKind, Registration, ReturnInfo,
    Signature,
};
