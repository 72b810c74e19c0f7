//! Middleware chain wrapping route dispatch.
//!
//! A [`MiddlewareChain`] is an ordered list of interceptors. Wrapping a
//! terminal handler with [`MiddlewareChain::wrap`] produces a [`Chained`]
//! callable; each invocation runs the middleware in list order. A middleware
//! proceeds by calling [`Next::run`] at most once, may transform the
//! downstream result or error, or may short-circuit by not calling it at
//! all, in which case no later stage runs.
//!
//! Calling [`Next::run`] a second time yields
//! [`DispatchError::DuplicateNextInvocation`] without running anything.
//!
//! # Example
//!
//! ```rust
//! use chisel::{DispatchError, MiddlewareChain, middleware_fn};
//!
//! let audit = middleware_fn("audit", |ctx, next| async move {
//!     let route = ctx.route.clone();
//!     let result = next.run(ctx).await;
//!     if result.is_err() {
//!         eprintln!("{route} failed");
//!     }
//!     result
//! });
//!
//! let deny_admin = middleware_fn("deny_admin", |ctx, next| async move {
//!     if ctx.route.starts_with("admin.") {
//!         return Err(DispatchError::handler("forbidden"));
//!     }
//!     next.run(ctx).await
//! });
//!
//! let chain = MiddlewareChain::new().with(audit).with(deny_admin);
//! assert_eq!(chain.len(), 2);
//! ```

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::error::DispatchError;
use crate::router::RequestContext;

/// Future produced by a middleware stage or a wrapped terminal handler.
pub type MiddlewareFuture = LocalBoxFuture<'static, Result<Value, DispatchError>>;

type Terminal = Rc<dyn Fn(RequestContext) -> MiddlewareFuture>;

/// An interceptor around route dispatch.
///
/// # Example
///
/// ```rust
/// use chisel::{Middleware, MiddlewareFuture, Next, RequestContext};
///
/// struct Counter(std::rc::Rc<std::cell::Cell<u32>>);
///
/// impl Middleware for Counter {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture {
///         self.0.set(self.0.get() + 1);
///         next.run(ctx)
///     }
/// }
/// ```
pub trait Middleware {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Handle one call. Call `next.run(ctx)` to continue down the chain.
    fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture;
}

/// Create a middleware from a name and an async closure.
pub fn middleware_fn<F, Fut>(name: &str, handle: F) -> Rc<dyn Middleware>
where
    F: Fn(RequestContext, Next) -> Fut + 'static,
    Fut: Future<Output = Result<Value, DispatchError>> + 'static,
{
    Rc::new(FnMiddleware {
        name: name.to_string(),
        handle,
    })
}

struct FnMiddleware<F> {
    name: String,
    handle: F,
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(RequestContext, Next) -> Fut,
    Fut: Future<Output = Result<Value, DispatchError>> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture {
        Box::pin((self.handle)(ctx, next))
    }
}

/// Continuation handed to a middleware for one invocation.
///
/// Single use: the first [`Next::run`] proceeds to the following stage, any
/// further call fails with [`DispatchError::DuplicateNextInvocation`].
pub struct Next {
    chain: Rc<ChainInner>,
    index: usize,
    called: Cell<bool>,
}

impl Next {
    /// Run the rest of the chain with `ctx`.
    pub fn run(&self, ctx: RequestContext) -> MiddlewareFuture {
        if self.called.replace(true) {
            tracing::warn!(fqn = %ctx.route, stage = self.index, "middleware called next twice");
            return Box::pin(futures::future::ready(Err(
                DispatchError::DuplicateNextInvocation,
            )));
        }
        run_stage(&self.chain, self.index, ctx)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("called", &self.called.get())
            .finish()
    }
}

struct ChainInner {
    stages: Vec<Rc<dyn Middleware>>,
    terminal: Terminal,
}

fn run_stage(chain: &Rc<ChainInner>, index: usize, ctx: RequestContext) -> MiddlewareFuture {
    match chain.stages.get(index) {
        Some(stage) => {
            tracing::trace!(fqn = %ctx.route, middleware = stage.name(), "entering middleware");
            let next = Next {
                chain: Rc::clone(chain),
                index: index + 1,
                called: Cell::new(false),
            };
            stage.handle(ctx, next)
        }
        None => (chain.terminal)(ctx),
    }
}

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Rc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Empty chain; wrapping with it calls the terminal handler directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware, builder style.
    pub fn with(mut self, middleware: Rc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    /// Append a middleware.
    pub fn push(&mut self, middleware: Rc<dyn Middleware>) {
        self.stages.push(middleware);
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no middleware.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wrap `terminal` into a single callable.
    pub fn wrap<F, Fut>(&self, terminal: F) -> Chained
    where
        F: Fn(RequestContext) -> Fut + 'static,
        Fut: Future<Output = Result<Value, DispatchError>> + 'static,
    {
        let terminal: Terminal =
            Rc::new(move |ctx: RequestContext| -> MiddlewareFuture { Box::pin(terminal(ctx)) });
        Chained {
            inner: Rc::new(ChainInner {
                stages: self.stages.clone(),
                terminal,
            }),
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|stage| stage.name()).collect();
        f.debug_struct("MiddlewareChain")
            .field("stages", &names)
            .finish()
    }
}

/// A middleware chain bound to its terminal handler.
#[derive(Clone)]
pub struct Chained {
    inner: Rc<ChainInner>,
}

impl Chained {
    /// Run one invocation through every stage.
    pub fn call(&self, ctx: RequestContext) -> MiddlewareFuture {
        run_stage(&self.inner, 0, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::types::ConnectionId;

    type Log = Rc<RefCell<Vec<String>>>;

    fn ctx() -> RequestContext {
        RequestContext::new(ConnectionId::new(1), "eggs.ping", json!(1))
    }

    fn recording(name: &'static str, log: &Log) -> Rc<dyn Middleware> {
        let log = log.clone();
        middleware_fn(name, move |ctx, next| {
            let log = log.clone();
            async move {
                log.borrow_mut().push(format!("{name}:before"));
                let result = next.run(ctx).await;
                log.borrow_mut().push(format!("{name}:after"));
                result
            }
        })
    }

    fn terminal(log: &Log) -> impl Fn(RequestContext) -> MiddlewareFuture + 'static {
        let log = log.clone();
        move |ctx: RequestContext| -> MiddlewareFuture {
            log.borrow_mut().push("handler".to_string());
            Box::pin(futures::future::ready(Ok(ctx.params)))
        }
    }

    #[tokio::test]
    async fn test_runs_in_list_order() {
        let log: Log = Rc::default();
        let chain = MiddlewareChain::new()
            .with(recording("mw1", &log))
            .with(recording("mw2", &log));

        let out = chain.wrap(terminal(&log)).call(ctx()).await;
        assert_eq!(out, Ok(json!(1)));
        assert_eq!(
            *log.borrow(),
            vec!["mw1:before", "mw2:before", "handler", "mw2:after", "mw1:after"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_calls_terminal() {
        let log: Log = Rc::default();
        let out = MiddlewareChain::new().wrap(terminal(&log)).call(ctx()).await;
        assert_eq!(out, Ok(json!(1)));
        assert_eq!(*log.borrow(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log: Log = Rc::default();
        let gate = middleware_fn("gate", |_ctx, _next| async {
            Ok::<_, DispatchError>(json!("cached"))
        });
        let chain = MiddlewareChain::new()
            .with(gate)
            .with(recording("mw2", &log));

        let out = chain.wrap(terminal(&log)).call(ctx()).await;
        assert_eq!(out, Ok(json!("cached")));
        assert!(log.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_next_twice_fails() {
        let log: Log = Rc::default();
        let greedy = middleware_fn("greedy", |ctx: RequestContext, next| async move {
            let _ = next.run(ctx.clone()).await;
            next.run(ctx).await
        });
        let chain = MiddlewareChain::new()
            .with(greedy)
            .with(recording("mw2", &log));

        let out = chain.wrap(terminal(&log)).call(ctx()).await;
        assert_eq!(out, Err(DispatchError::DuplicateNextInvocation));
        assert_eq!(*log.borrow(), vec!["mw2:before", "handler", "mw2:after"]);
    }

    #[tokio::test]
    async fn test_each_invocation_gets_fresh_next() {
        let log: Log = Rc::default();
        let chained = MiddlewareChain::new()
            .with(recording("mw1", &log))
            .wrap(terminal(&log));

        assert_eq!(chained.call(ctx()).await, Ok(json!(1)));
        assert_eq!(chained.call(ctx()).await, Ok(json!(1)));
        assert_eq!(log.borrow().len(), 6);
    }

    #[tokio::test]
    async fn test_transforms_result_and_error() {
        let rewrite = middleware_fn("rewrite", |ctx, next| async move {
            match next.run(ctx).await {
                Ok(value) => Ok(json!({ "wrapped": value })),
                Err(err) => Err(DispatchError::handler(format!("wrapped {err}"))),
            }
        });
        let chain = MiddlewareChain::new().with(rewrite);

        let ok = chain
            .wrap(|ctx: RequestContext| async move { Ok::<_, DispatchError>(ctx.params) })
            .call(ctx())
            .await;
        assert_eq!(ok, Ok(json!({ "wrapped": 1 })));

        let err = chain
            .wrap(|_ctx: RequestContext| async {
                Err::<Value, _>(DispatchError::RouteNotFound("eggs.ping".to_string()))
            })
            .call(ctx())
            .await;
        assert_eq!(
            err,
            Err(DispatchError::handler("wrapped route_not_found:eggs.ping"))
        );
    }

    #[tokio::test]
    async fn test_middleware_can_rewrite_context() {
        let double = middleware_fn("double", |mut ctx: RequestContext, next| async move {
            let n = ctx.params.as_i64().unwrap_or_default();
            ctx.params = json!(n * 2);
            next.run(ctx).await
        });
        let out = MiddlewareChain::new()
            .with(double)
            .wrap(|ctx: RequestContext| async move { Ok::<_, DispatchError>(ctx.params) })
            .call(ctx())
            .await;
        assert_eq!(out, Ok(json!(2)));
    }

    #[test]
    fn test_debug_lists_stage_names() {
        let chain = MiddlewareChain::new()
            .with(middleware_fn("a", |ctx, next: Next| next.run(ctx)))
            .with(middleware_fn("b", |ctx, next: Next| next.run(ctx)));
        assert_eq!(chain.len(), 2);
        assert!(format!("{chain:?}").contains("[\"a\", \"b\"]"));
    }
}
