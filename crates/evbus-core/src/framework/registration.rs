//! Typed handler registrations for the [`TypeDispatcher`](super::dispatcher::TypeDispatcher).
//!
//! Any async function or closure can be registered, similar to Axum handlers.
//! Each parameter is resolved through [`HandlerParam`]: [`Context`] receives
//! the execution context and every [`FromEvent`] type receives an extracted
//! view of the event. The registration records a [`Signature`] describing
//! the function so that its shape is validated eagerly:
//!
//! ```rust,ignore
//! // valid: context first, exactly one event, returns Result
//! async fn on_order(ctx: Context, order: Arc<OrderPlaced>) -> anyhow::Result<()> { .. }
//!
//! // rejected at build time with RegistrationError::WrongReturnType
//! async fn on_refund(ctx: Context, refund: Arc<Refund>) { .. }
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::foundation::context::Context;
use crate::foundation::error::{BoxError, BusError, BusResult, RegistrationError};
use crate::foundation::event::{BoxedEvent, FromEvent};

// ============================================================================
// Signature
// ============================================================================

/// What a handler parameter receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The execution context.
    Context,
    /// An extracted view of the event.
    Event,
}

/// One declared handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    /// What the parameter receives.
    pub kind: ParamKind,
    /// The declared Rust type.
    pub type_name: &'static str,
}

impl ParamInfo {
    /// Describes parameter type `T`.
    pub fn of<T: HandlerParam>() -> Self {
        Self {
            kind: T::KIND,
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// The declared return type of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnInfo {
    /// Whether the type can report failure.
    pub reports_failure: bool,
    /// The declared Rust type.
    pub type_name: &'static str,
}

impl ReturnInfo {
    /// Describes return type `R`.
    pub fn of<R: HandlerReturn>() -> Self {
        Self {
            reports_failure: R::REPORTS_FAILURE,
            type_name: std::any::type_name::<R>(),
        }
    }
}

/// The shape of a registered handler function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Declared parameters, in order.
    pub params: Vec<ParamInfo>,
    /// Declared return type.
    pub returns: ReturnInfo,
}

impl Signature {
    /// Checks that the handler takes `(Context, event)` and returns a result.
    ///
    /// `index` is the registration position reported in errors.
    pub fn check(&self, index: usize) -> Result<(), RegistrationError> {
        if self.params.len() != 2 {
            return Err(RegistrationError::WrongArity {
                index,
                found: self.params.len(),
            });
        }
        if !self.returns.reports_failure {
            return Err(RegistrationError::WrongReturnType {
                index,
                found: self.returns.type_name,
            });
        }
        if self.params[0].kind != ParamKind::Context {
            return Err(RegistrationError::WrongContextType {
                index,
                found: self.params[0].type_name,
            });
        }
        // (Context, Context) has no event parameter at all
        if self.params[1].kind != ParamKind::Event {
            return Err(RegistrationError::WrongArity { index, found: 1 });
        }
        Ok(())
    }

    /// Returns the declared event parameter type, if the shape has one.
    pub fn event_type_name(&self) -> Option<&'static str> {
        self.params
            .iter()
            .find(|p| p.kind == ParamKind::Event)
            .map(|p| p.type_name)
    }
}

// ============================================================================
// Parameters and return values
// ============================================================================

/// A type that can appear as a handler parameter.
pub trait HandlerParam: Sized + Send + 'static {
    /// What the parameter receives.
    const KIND: ParamKind;

    /// Resolves the parameter for one invocation, `None` if the event does
    /// not fit.
    fn extract(ctx: &Context, event: &BoxedEvent) -> Option<Self>;
}

impl HandlerParam for Context {
    const KIND: ParamKind = ParamKind::Context;

    fn extract(ctx: &Context, _event: &BoxedEvent) -> Option<Self> {
        Some(ctx.clone())
    }
}

impl<T: FromEvent> HandlerParam for T {
    const KIND: ParamKind = ParamKind::Event;

    fn extract(_ctx: &Context, event: &BoxedEvent) -> Option<Self> {
        T::from_event(event)
    }
}

/// A type that can be returned from a handler.
///
/// `Result<(), E>` reports success or failure. `()` is accepted by the type
/// system so that it can be rejected with a descriptive registration error.
pub trait HandlerReturn: Send + 'static {
    /// Whether this type can report failure.
    const REPORTS_FAILURE: bool;

    /// Converts the value into a bus result.
    fn into_result(self) -> BusResult;
}

impl<E> HandlerReturn for Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    const REPORTS_FAILURE: bool = true;

    fn into_result(self) -> BusResult {
        self.map_err(BusError::handler)
    }
}

impl HandlerReturn for () {
    const REPORTS_FAILURE: bool = false;

    fn into_result(self) -> BusResult {
        Ok(())
    }
}

// ============================================================================
// EventFn
// ============================================================================

/// A function usable as a typed event handler.
///
/// Implemented for `Fn` closures and async functions of up to four
/// [`HandlerParam`] parameters returning a future of a [`HandlerReturn`].
pub trait EventFn<Args>: Clone + Send + Sync + 'static {
    /// Describes the function's shape.
    fn signature() -> Signature;

    /// Starts the handler if every parameter extracts from `event`.
    fn invoke(&self, ctx: &Context, event: &BoxedEvent) -> Option<BoxFuture<'static, BusResult>>;
}

macro_rules! impl_event_fn {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, R, $($ty,)*> EventFn<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: HandlerReturn,
            $( $ty: HandlerParam, )*
        {
            fn signature() -> Signature {
                Signature {
                    params: vec![$(ParamInfo::of::<$ty>(),)*],
                    returns: ReturnInfo::of::<R>(),
                }
            }

            fn invoke(
                &self,
                ctx: &Context,
                event: &BoxedEvent,
            ) -> Option<BoxFuture<'static, BusResult>> {
                $(
                    let $ty = <$ty as HandlerParam>::extract(ctx, event)?;
                )*

                let fut = (self)($($ty,)*);
                Some(async move { fut.await.into_result() }.boxed())
            }
        }
    };
}

impl_event_fn!();
impl_event_fn!(T1);
impl_event_fn!(T1, T2);
impl_event_fn!(T1, T2, T3);
impl_event_fn!(T1, T2, T3, T4);

// ============================================================================
// Registration
// ============================================================================

/// Type-erased invocation of a typed handler.
pub(crate) type ErasedInvoke =
    Arc<dyn Fn(&Context, &BoxedEvent) -> Option<BoxFuture<'static, BusResult>> + Send + Sync>;

#[derive(Clone)]
enum Source {
    Typed {
        signature: Signature,
        invoke: ErasedInvoke,
    },
    Dynamic(Arc<dyn Any + Send + Sync>),
}

/// One entry in a dispatcher's ordered handler list.
#[derive(Clone)]
pub struct Registration {
    source: Source,
}

/// A validated registration ready for dispatch.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) signature: Signature,
    pub(crate) invoke: ErasedInvoke,
}

impl Registration {
    /// Registers a typed handler function.
    pub fn new<F, Args>(handler: F) -> Self
    where
        F: EventFn<Args>,
        Args: 'static,
    {
        Self {
            source: Source::Typed {
                signature: F::signature(),
                invoke: Arc::new(move |ctx: &Context, event: &BoxedEvent| {
                    handler.invoke(ctx, event)
                }),
            },
        }
    }

    /// Wraps a dynamically typed value, for registrations collected from
    /// type-erased sources such as plugin maps.
    ///
    /// The value must be a `Registration`; anything else fails validation
    /// with [`RegistrationError::NotAFunction`].
    pub fn from_any(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            source: Source::Dynamic(value),
        }
    }

    /// Returns the handler signature, if this is a typed registration.
    pub fn signature(&self) -> Option<&Signature> {
        match &self.source {
            Source::Typed { signature, .. } => Some(signature),
            Source::Dynamic(_) => None,
        }
    }

    /// Validates the registration as if it were at position `index`.
    pub fn validate(&self, index: usize) -> Result<(), RegistrationError> {
        self.resolve(index).map(|_| ())
    }

    pub(crate) fn resolve(&self, index: usize) -> Result<Route, RegistrationError> {
        match &self.source {
            Source::Typed { signature, invoke } => {
                signature.check(index)?;
                Ok(Route {
                    signature: signature.clone(),
                    invoke: Arc::clone(invoke),
                })
            }
            Source::Dynamic(value) => value
                .downcast_ref::<Registration>()
                .ok_or(RegistrationError::NotAFunction { index })?
                .resolve(index),
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Typed { signature, .. } => f
                .debug_struct("Registration")
                .field("signature", signature)
                .finish(),
            Source::Dynamic(_) => f.debug_struct("Registration").field("dynamic", &true).finish(),
        }
    }
}
