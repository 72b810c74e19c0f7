//! # Chisel
//!
//! Tick-batched RPC over unreliable message channels.
//!
//! This crate provides:
//! - **Batcher**: coalesces every call made during one scheduler tick into a
//!   single request batch and correlates responses back by id
//! - **Router**: a namespace tree resolving dotted names like
//!   `"eggs.nest.count"` to validated handlers
//! - **Middleware**: ordered interceptors around dispatch
//! - **Manifest**: an advisory listing of every namespace and route
//! - **Server**: the transport orchestrator dispatching each received batch
//!   concurrently and answering at most once per tick per connection
//!
//! The transport itself is injected through the [`channel`] traits;
//! [`LoopbackNetwork`] is an in-memory implementation.
//!
//! Everything is single-threaded (`Rc`/`RefCell`) and runs inside a tokio
//! [`LocalSet`](tokio::task::LocalSet).

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Identifier types.
pub mod types;

/// Error types for dispatch, calls and registration.
pub mod error;

/// Wire envelopes.
pub mod wire;

/// Batch serialization.
pub mod codec;

/// Tick source abstraction.
pub mod tick;

/// Local task spawning.
pub mod task;

/// Randomness source.
pub mod random;

/// Provider bundles.
pub mod providers;

/// Client, server and loopback configuration.
pub mod config;

/// Namespace-tree routing.
pub mod router;

/// Middleware chain.
pub mod middleware;

/// Route manifest.
pub mod manifest;

/// Injected transport interface.
pub mod channel;

/// Client side.
pub mod client;

/// Server side.
pub mod server;

/// In-memory channel binding.
pub mod loopback;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use types::{CallId, ConnectionId};

pub use error::{CallError, DispatchError, ErrorKind, HandlerError, RegistrationError};

pub use wire::{RequestEnvelope, ResponseEnvelope};

pub use codec::{CodecError, JsonCodec, MessageCodec};

pub use tick::{DEFAULT_TICK_INTERVAL, ManualTickProvider, TickProvider, TokioTickProvider};
pub use task::{TaskProvider, TokioTaskProvider};
pub use random::{RandomProvider, TokioRandomProvider};
pub use providers::{ManualProviders, Providers, TokioProviders};

pub use config::{ClientConfig, LoopbackConfig, ServerConfig};

pub use router::{
    Check, HandlerFuture, NamespaceBuilder, NamespaceNode, ROOT_NAMESPACE, RequestContext,
    RouteDefinition, Router,
};

pub use middleware::{Chained, Middleware, MiddlewareChain, MiddlewareFuture, Next, middleware_fn};

pub use manifest::{Manifest, ManifestRoute};

pub use channel::{ClientChannel, ClientEvents, ServerChannel, ServerEvents};

pub use client::{Batcher, Client, NamespaceClient, ReplyFuture};

pub use server::{Server, ServerBuilder};

pub use loopback::{LoopbackClient, LoopbackNetwork, LoopbackStats};
