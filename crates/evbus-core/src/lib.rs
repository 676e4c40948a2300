//! # evbus Core
//!
//! In-process event routing, bounded execution and reliable consumption.
//!
//! ## Architecture Layers
//!
//! evbus Core is organized into three layers:
//!
//! ### Foundation Layer
//!
//! Core abstractions and type system:
//! - **Context**: Cancellation and deadlines ([`Context`])
//! - **Event System**: Type-erased events with runtime downcasting ([`BoxedEvent`], [`FromEvent`])
//! - **Errors**: One taxonomy for every component ([`BusError`], [`AdapterError`])
//!
//! ### Framework Layer
//!
//! Event processing and routing:
//! - **Handler System**: The capability every stage implements ([`EventHandler`])
//! - **Registrations**: Typed handler functions validated up front ([`Registration`])
//! - **Dispatcher**: First-match routing by event type ([`TypeDispatcher`])
//! - **Executor**: Bounded background execution ([`ConcurrencyLimitedExecutor`])
//!
//! ### Integration Layer
//!
//! External event sources:
//! - **Adapter System**: Receive-and-acknowledge sources ([`AckAdapter`])
//! - **Ack Loop**: Sequential receive, handle, acknowledge ([`AckLoopServer`])
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌──────────┐     ┌────────────┐
//! │  AckAdapter │────▶│ AckLoopServer │────▶│ Executor │────▶│ Dispatcher │──▶ typed fns
//! └─────────────┘◀─ack┘───────────────┘     └──────────┘     └────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use evbus_core::{BoxedEvent, BusError, Context, TypeDispatcher};
//!
//! struct UserCreated {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BusError> {
//!     let dispatcher = TypeDispatcher::builder()
//!         .on(|_ctx: Context, event: Arc<UserCreated>| async move {
//!             println!("welcome, {}", event.name);
//!             Ok::<_, BusError>(())
//!         })
//!         .build()?;
//!
//!     let event = BoxedEvent::new(UserCreated { name: "ada".into() });
//!     dispatcher.dispatch(&Context::background(), event).await
//! }
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    AdapterError, AdapterResult, BoxError, BoxedEvent, BusError, BusResult, Context,
    ContextError, FromEvent, HandlerNotFound, RegistrationError,
};

// Re-export framework types
pub use framework::{
    BoxedHandler, ConcurrencyLimitedExecutor, ErrorCallback, EventFn, EventHandler,
    ExecutorBuilder, ExecutorConfig, HandlerFn, HandlerParam, HandlerReturn, ParamInfo,
    ParamKind, Registration, ReturnInfo, Signature, TypeDispatcher, TypeDispatcherBuilder,
    handler_fn,
};

// Re-export integration types
pub use integration::{AckAdapter, AckLoopServer, BoxedAdapter, HandlerServer, RunState};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::framework::{
        BoxedHandler, ConcurrencyLimitedExecutor, EventHandler, Registration, TypeDispatcher,
        handler_fn,
    };
    pub use super::integration::{AckAdapter, AckLoopServer, HandlerServer};
}
