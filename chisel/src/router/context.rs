//! Per-call request context.

use std::time::Instant;

use serde_json::Value;

use crate::types::ConnectionId;

/// Context handed to middleware and handlers for one call.
///
/// Created fresh per call and owned by that call's dispatch. `In` is
/// `serde_json::Value` for untyped routes and the decoded parameter type for
/// [`RouteDefinition::typed`](crate::RouteDefinition::typed) routes.
#[derive(Debug, Clone)]
pub struct RequestContext<In = Value> {
    /// Connection the call arrived on.
    pub connection: ConnectionId,
    /// Call parameters.
    pub params: In,
    /// Fully-qualified route name.
    pub route: String,
    /// When the context was created.
    pub timestamp: Instant,
}

impl RequestContext<Value> {
    /// Create a context stamped with the current time.
    pub fn new(connection: ConnectionId, route: impl Into<String>, params: Value) -> Self {
        Self {
            connection,
            params,
            route: route.into(),
            timestamp: Instant::now(),
        }
    }
}

impl<In> RequestContext<In> {
    /// Replace the parameters, keeping connection, route and timestamp.
    pub fn with_params<U>(self, params: U) -> RequestContext<U> {
        RequestContext {
            connection: self.connection,
            params,
            route: self.route,
            timestamp: self.timestamp,
        }
    }

    /// Namespace part of the route (everything before the last `.`).
    ///
    /// Empty for routes registered on the root namespace.
    pub fn namespace(&self) -> &str {
        self.route
            .rsplit_once('.')
            .map(|(namespace, _)| namespace)
            .unwrap_or("")
    }
}
