//! Namespace-tree router.
//!
//! Routes are registered once at startup into a tree of named namespaces and
//! resolved at call time by fully-qualified name (`"eggs.nest.count"`):
//! every leading segment selects a child namespace, the final segment names a
//! route in the resolved node.
//!
//! # Dispatch
//!
//! [`Router::dispatch`] runs one call through four gates, each with its own
//! [`DispatchError`]:
//!
//! 1. namespace walk: [`DispatchError::NamespaceNotFound`] with the longest
//!    matched prefix plus the failing segment
//! 2. route lookup: [`DispatchError::RouteNotFound`] with the full fqn
//! 3. input check: [`DispatchError::BadRequest`]
//! 4. output check after the handler ran: [`DispatchError::BadResponse`]
//!
//! Handler errors surface as [`DispatchError::HandlerFailure`].
//!
//! # Example
//!
//! ```rust
//! use chisel::{Check, RouteDefinition, Router};
//!
//! let mut router = Router::new();
//! router
//!     .namespace("eggs", |eggs| {
//!         eggs.route(
//!             "ping",
//!             RouteDefinition::sync(Check::of::<f64>(), Check::of::<f64>(), |ctx| Ok(ctx.params)),
//!         )?;
//!         Ok(())
//!     })
//!     .expect("valid registration");
//!
//! assert!(router.resolve("eggs.ping").is_ok());
//! ```

mod check;
mod context;
mod namespace;
mod route;

pub use check::Check;
pub use context::RequestContext;
pub use namespace::{NamespaceBuilder, NamespaceNode};
pub use route::{HandlerFuture, RouteDefinition};

use serde_json::Value;

use crate::error::{DispatchError, RegistrationError};
use crate::types::ConnectionId;

/// Name of the fixed root node. Never part of an fqn.
pub const ROOT_NAMESPACE: &str = "root";

/// Router over a startup-built namespace tree.
#[derive(Debug, Clone)]
pub struct Router {
    root: NamespaceNode,
}

impl Router {
    /// Create a router with an empty root namespace.
    pub fn new() -> Self {
        Self {
            root: NamespaceNode::new(ROOT_NAMESPACE),
        }
    }

    /// Register a top-level namespace and configure it with `build`.
    ///
    /// # Errors
    ///
    /// See [`NamespaceBuilder::namespace`].
    pub fn namespace<F>(&mut self, name: &str, build: F) -> Result<&mut Self, RegistrationError>
    where
        F: FnOnce(&mut NamespaceBuilder<'_>) -> Result<(), RegistrationError>,
    {
        self.builder().namespace(name, build)?;
        Ok(self)
    }

    /// Register a route on the root namespace. Its fqn is the bare name.
    ///
    /// # Errors
    ///
    /// See [`NamespaceBuilder::route`].
    pub fn route(
        &mut self,
        name: &str,
        definition: RouteDefinition,
    ) -> Result<&mut Self, RegistrationError> {
        self.builder().route(name, definition)?;
        Ok(self)
    }

    /// The root of the namespace tree.
    pub fn tree(&self) -> &NamespaceNode {
        &self.root
    }

    fn builder(&mut self) -> NamespaceBuilder<'_> {
        NamespaceBuilder::new(&mut self.root, String::new())
    }

    /// Resolve an fqn to its route definition without running it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NamespaceNotFound`] or [`DispatchError::RouteNotFound`].
    pub fn resolve(&self, fqn: &str) -> Result<&RouteDefinition, DispatchError> {
        let segments: Vec<&str> = fqn.split('.').collect();
        let Some((route_name, path)) = segments.split_last() else {
            return Err(DispatchError::RouteNotFound(fqn.to_string()));
        };

        let mut node = &self.root;
        for (depth, segment) in path.iter().enumerate() {
            node = node
                .child(segment)
                .ok_or_else(|| DispatchError::NamespaceNotFound(segments[..=depth].join(".")))?;
        }

        node.route(route_name)
            .ok_or_else(|| DispatchError::RouteNotFound(fqn.to_string()))
    }

    /// Dispatch one call.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`] other than
    /// [`DispatchError::DuplicateNextInvocation`].
    pub async fn dispatch(
        &self,
        fqn: &str,
        connection: ConnectionId,
        payload: Value,
    ) -> Result<Value, DispatchError> {
        self.dispatch_context(RequestContext::new(connection, fqn, payload))
            .await
    }

    /// Dispatch a call whose context was already built, e.g. by middleware.
    ///
    /// # Errors
    ///
    /// Same as [`Router::dispatch`].
    pub async fn dispatch_context(&self, ctx: RequestContext) -> Result<Value, DispatchError> {
        let fqn = ctx.route.clone();
        let route = self.resolve(&fqn)?;

        if !route.input().check(&ctx.params) {
            tracing::trace!(fqn = %fqn, check = route.input().name(), "input check failed");
            return Err(DispatchError::BadRequest(fqn));
        }

        let output = route.invoke(ctx).await?;

        if !route.output().check(&output) {
            tracing::warn!(
                fqn = %fqn,
                check = route.output().name(),
                "handler output failed its check"
            );
            return Err(DispatchError::BadResponse(fqn));
        }

        Ok(output)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
