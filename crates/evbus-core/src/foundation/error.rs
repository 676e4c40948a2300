//! Unified error types for evbus.
//!
//! [`BusError`] is what every handler, executor and server call returns.
//! Adapter implementations report [`AdapterError`], which converts into
//! `BusError` when it crosses the ack loop.

use thiserror::Error;

use crate::foundation::event::BoxedEvent;

/// Opaque error produced by business-logic handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Context Errors
// =============================================================================

/// Why a [`Context`](crate::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled.
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

// =============================================================================
// Registration Errors
// =============================================================================

/// A handler registration with an unusable shape.
///
/// Detected when a dispatcher is built, never at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A dynamically supplied registration value is not a handler.
    #[error("registration #{index} is not a handler function")]
    NotAFunction {
        /// Position in registration order.
        index: usize,
    },

    /// The handler does not take exactly a context and one event.
    #[error("registration #{index} takes {found} parameters, expected (Context, event)")]
    WrongArity {
        /// Position in registration order.
        index: usize,
        /// Number of parameters the handler takes.
        found: usize,
    },

    /// The handler return type cannot report failure.
    #[error("registration #{index} returns `{found}`, expected `Result<(), E>`")]
    WrongReturnType {
        /// Position in registration order.
        index: usize,
        /// The declared return type.
        found: &'static str,
    },

    /// The first parameter does not accept the execution context.
    #[error("registration #{index} takes `{found}` as its first parameter, expected `Context`")]
    WrongContextType {
        /// Position in registration order.
        index: usize,
        /// The declared first parameter type.
        found: &'static str,
    },
}

// =============================================================================
// Dispatch Miss
// =============================================================================

/// No registration accepted the event.
///
/// Carries the event so callers can log or reroute it.
#[derive(Debug, Clone, Error)]
#[error("event handler for event of type {} was not found", .event.type_name())]
pub struct HandlerNotFound {
    /// The unmatched event.
    pub event: BoxedEvent,
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors reported by an [`AckAdapter`](crate::AckAdapter).
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The event source was closed.
    #[error("event source closed")]
    Closed,

    /// The event source has no more events and will not produce any.
    #[error("event source exhausted")]
    Exhausted,

    /// There is no received event to acknowledge.
    #[error("no event to acknowledge")]
    NothingToAck,

    /// The acknowledgement was rejected by the source.
    #[error("acknowledgement failed: {0}")]
    Ack(String),

    /// Waiting for the next event was interrupted by the context.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Internal adapter error.
    #[error("adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Creates an internal adapter error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates an acknowledgement error.
    pub fn ack(msg: impl Into<String>) -> Self {
        Self::Ack(msg.into())
    }
}

// =============================================================================
// Bus Errors
// =============================================================================

/// Errors returned by handlers, the executor and the ack-loop server.
#[derive(Debug, Error)]
pub enum BusError {
    /// A handler registration has an unusable shape.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// No registration accepted the event.
    #[error(transparent)]
    HandlerNotFound(#[from] HandlerNotFound),

    /// The caller's context ended first.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// `initialize` was called on an executor that is already initialized.
    #[error("executor is already initialized")]
    AlreadyInitialized,

    /// The executor was used before `initialize`.
    #[error("executor is not initialized")]
    NotInitialized,

    /// The executor no longer admits jobs.
    #[error("executor is closed")]
    ExecutorClosed,

    /// The server already terminated; use a new instance to run again.
    #[error("server was already closed, use a new instance to run it again")]
    AlreadyClosed,

    /// The event source failed.
    #[error(transparent)]
    Adapter(AdapterError),

    /// A business-logic handler failed.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),
}

impl BusError {
    /// Converts a handler failure into a `BusError`.
    ///
    /// A boxed `BusError` is unwrapped back into its own variant, so context
    /// errors returned through a handler stay recognisable.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<BusError>() {
            Ok(bus) => *bus,
            Err(other) => Self::Handler(other),
        }
    }

    /// Returns the context error if this failure came from cancellation or a
    /// deadline.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(err) | Self::Adapter(AdapterError::Context(err)) => Some(*err),
            _ => None,
        }
    }

    /// Returns the unmatched event if this is a dispatch miss.
    pub fn handler_not_found(&self) -> Option<&HandlerNotFound> {
        match self {
            Self::HandlerNotFound(miss) => Some(miss),
            _ => None,
        }
    }
}

impl From<AdapterError> for BusError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Context(ctx) => Self::Context(ctx),
            other => Self::Adapter(other),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for bus operations.
pub type BusResult<T = ()> = Result<T, BusError>;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
