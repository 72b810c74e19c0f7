//! Injected transport interface.
//!
//! chisel does not own the underlying bidirectional channel or its session
//! lifecycle. A binding implements [`ClientChannel`] and/or
//! [`ServerChannel`] to carry batches, and calls back into the
//! [`ClientEvents`]/[`ServerEvents`] receiver registered with `subscribe`.
//!
//! Callbacks are synchronous and must not block: implementations of the
//! event traits only record state or spawn local tasks.
//!
//! The in-memory [`LoopbackNetwork`](crate::LoopbackNetwork) implements both
//! sides.

use std::rc::Rc;

use crate::manifest::Manifest;
use crate::types::ConnectionId;
use crate::wire::{RequestEnvelope, ResponseEnvelope};

/// Client end of a channel.
pub trait ClientChannel {
    /// Send one request batch. At most one batch per tick is expected.
    fn send_requests(&self, batch: Vec<RequestEnvelope>);

    /// Register the receiver of server-to-client traffic.
    ///
    /// A later call replaces the previous receiver.
    fn subscribe(&self, events: Rc<dyn ClientEvents>);
}

/// Receiver of server-to-client traffic.
pub trait ClientEvents {
    /// A response batch arrived.
    fn responses_received(&self, batch: Vec<ResponseEnvelope>);

    /// The server pushed its manifest.
    fn manifest_received(&self, manifest: Manifest);

    /// The connection is gone; nothing more will arrive.
    fn disconnected(&self);
}

/// Server end of a channel, multiplexing every connection.
pub trait ServerChannel {
    /// Send one response batch to `connection`.
    fn send_responses(&self, connection: ConnectionId, batch: Vec<ResponseEnvelope>);

    /// Push the manifest to `connection`.
    fn send_manifest(&self, connection: ConnectionId, manifest: &Manifest);

    /// Register the receiver of client-to-server traffic.
    ///
    /// A later call replaces the previous receiver.
    fn subscribe(&self, events: Rc<dyn ServerEvents>);
}

/// Receiver of client-to-server traffic.
pub trait ServerEvents {
    /// A new connection was established.
    fn connection_opened(&self, connection: ConnectionId);

    /// A connection closed.
    fn connection_closed(&self, connection: ConnectionId);

    /// A request batch arrived on `connection`.
    fn requests_received(&self, connection: ConnectionId, batch: Vec<RequestEnvelope>);
}
