//! Route definitions: checks plus a type-erased handler.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::check::Check;
use super::context::RequestContext;
use crate::error::HandlerError;

/// Future returned by a type-erased handler.
pub type HandlerFuture = LocalBoxFuture<'static, Result<Value, HandlerError>>;

/// Type-erased handler: context in, boxed future out.
type HandlerFn = Rc<dyn Fn(RequestContext) -> HandlerFuture>;

/// A route: input check, output check and handler.
///
/// Registered once at startup and immutable afterwards. Cloning is cheap
/// (the handler is reference counted).
///
/// # Example
///
/// ```rust
/// use chisel::{Check, HandlerError, RouteDefinition};
///
/// // Untyped, synchronous echo.
/// let echo = RouteDefinition::sync(Check::of::<f64>(), Check::of::<f64>(), |ctx| Ok(ctx.params));
///
/// // Typed, asynchronous.
/// let double = RouteDefinition::typed(|ctx: chisel::RequestContext<u32>| async move {
///     Ok::<_, HandlerError>(ctx.params * 2)
/// });
/// ```
#[derive(Clone)]
pub struct RouteDefinition {
    input: Check,
    output: Check,
    handler: HandlerFn,
}

impl RouteDefinition {
    /// Route with an asynchronous handler over raw values.
    pub fn new<F, Fut>(input: Check, output: Check, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + 'static,
    {
        Self {
            input,
            output,
            handler: Rc::new(move |ctx: RequestContext| -> HandlerFuture {
                Box::pin(handler(ctx))
            }),
        }
    }

    /// Route with a synchronous handler over raw values.
    pub fn sync<F>(input: Check, output: Check, handler: F) -> Self
    where
        F: Fn(RequestContext) -> Result<Value, HandlerError> + 'static,
    {
        Self {
            input,
            output,
            handler: Rc::new(move |ctx: RequestContext| -> HandlerFuture {
                Box::pin(futures::future::ready(handler(ctx)))
            }),
        }
    }

    /// Route whose checks are derived from `In` and `Out`.
    ///
    /// The payload must deserialize into `In`, and the handler result is
    /// serialized and must deserialize back into `Out`.
    pub fn typed<In, Out, F, Fut>(handler: F) -> Self
    where
        In: DeserializeOwned + 'static,
        Out: Serialize + DeserializeOwned + 'static,
        F: Fn(RequestContext<In>) -> Fut + 'static,
        Fut: Future<Output = Result<Out, HandlerError>> + 'static,
    {
        let handler = Rc::new(handler);
        Self::new(Check::of::<In>(), Check::of::<Out>(), move |ctx| {
            let handler = Rc::clone(&handler);
            async move {
                let params: In = serde_json::from_value(ctx.params.clone())?;
                let output = handler(ctx.with_params(params)).await?;
                Ok::<_, HandlerError>(serde_json::to_value(output)?)
            }
        })
    }

    /// Input check.
    pub fn input(&self) -> &Check {
        &self.input
    }

    /// Output check.
    pub fn output(&self) -> &Check {
        &self.output
    }

    /// Run the handler without validation.
    pub(crate) fn invoke(&self, ctx: RequestContext) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("handler", &"<closure>")
            .finish()
    }
}
