//! Error types for chisel.
//!
//! - [`DispatchError`]: server-side failure of a single call, reported to the
//!   caller as a string plus an [`ErrorKind`] tag
//! - [`HandlerError`]: error raised by user handlers and middleware
//! - [`CallError`]: client-side failure surfaced by a [`ReplyFuture`](crate::ReplyFuture)
//! - [`RegistrationError`]: invalid router configuration at startup

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CallId;

/// Serializable discriminant of a [`DispatchError`].
///
/// Travels next to the error string in a
/// [`ResponseEnvelope`](crate::ResponseEnvelope) so callers can branch on
/// the failure class without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A namespace segment of the fqn did not match any child.
    NamespaceNotFound,
    /// The namespace path resolved but the final segment is not a route.
    RouteNotFound,
    /// The payload failed the route's input check.
    BadRequest,
    /// The handler result failed the route's output check.
    BadResponse,
    /// A middleware called `next` more than once.
    DuplicateNextInvocation,
    /// A handler or middleware failed.
    HandlerFailure,
}

/// Failure of one dispatched call.
///
/// The `Display` output is the wire convention used in the `err` field of a
/// response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Carries the longest matched prefix plus the failing segment.
    #[error("ns_not_found:{0}")]
    NamespaceNotFound(String),

    /// Carries the full fqn.
    #[error("route_not_found:{0}")]
    RouteNotFound(String),

    /// Input validation failed for the fqn.
    #[error("bad_request:{0}")]
    BadRequest(String),

    /// Output validation failed for the fqn. This is a server-side contract
    /// bug, not a caller error.
    #[error("bad_response:{0}")]
    BadResponse(String),

    /// A middleware invoked `next` twice within one invocation.
    #[error("mw_next_called_twice")]
    DuplicateNextInvocation,

    /// Error raised inside a handler or middleware.
    #[error("handler_failed:{0}")]
    HandlerFailure(String),
}

impl DispatchError {
    /// Build a [`DispatchError::HandlerFailure`] from any message.
    pub fn handler(message: impl Into<String>) -> Self {
        DispatchError::HandlerFailure(message.into())
    }

    /// The serializable tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NamespaceNotFound(_) => ErrorKind::NamespaceNotFound,
            DispatchError::RouteNotFound(_) => ErrorKind::RouteNotFound,
            DispatchError::BadRequest(_) => ErrorKind::BadRequest,
            DispatchError::BadResponse(_) => ErrorKind::BadResponse,
            DispatchError::DuplicateNextInvocation => ErrorKind::DuplicateNextInvocation,
            DispatchError::HandlerFailure(_) => ErrorKind::HandlerFailure,
        }
    }
}

impl From<HandlerError> for DispatchError {
    fn from(err: HandlerError) -> Self {
        DispatchError::HandlerFailure(err.message)
    }
}

/// Error returned by a route handler.
///
/// # Examples
///
/// ```
/// use chisel::{DispatchError, HandlerError};
///
/// let err = HandlerError::new("egg is cracked");
/// let dispatch: DispatchError = err.into();
/// assert_eq!(dispatch.to_string(), "handler_failed:egg is cracked");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Client-side failure of a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The server reported a failure.
    ///
    /// `message` is the server-provided string; `kind` is present when the
    /// server attached a structured tag.
    #[error("{message}")]
    Remote {
        /// Structured tag, if the server sent one.
        kind: Option<ErrorKind>,
        /// Server-provided error string.
        message: String,
    },

    /// No response arrived within the configured number of ticks.
    #[error("call {id} timed out after {ticks} ticks")]
    Timeout {
        /// The call that timed out.
        id: CallId,
        /// Configured deadline in ticks.
        ticks: u64,
    },

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The request payload could not be converted to a wire value.
    #[error("failed to encode request payload: {message}")]
    Encode {
        /// Serializer message.
        message: String,
    },

    /// The response data did not match the expected output type.
    #[error("failed to decode response payload: {message}")]
    Decode {
        /// Deserializer message.
        message: String,
    },
}

impl CallError {
    /// Structured tag of a remote failure, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CallError::Remote { kind, .. } => *kind,
            _ => None,
        }
    }
}

/// Invalid router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Names must be non-empty and must not contain `.`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// A sibling namespace with the same name already exists.
    #[error("duplicate namespace: {0}")]
    DuplicateNamespace(String),

    /// A route with the same name already exists in this namespace.
    #[error("duplicate route: {0}")]
    DuplicateRoute(String),
}
