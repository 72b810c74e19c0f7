//! In-memory channel binding.
//!
//! [`LoopbackNetwork`] implements [`ServerChannel`] and hands out
//! [`LoopbackClient`]s implementing [`ClientChannel`], so a server and any
//! number of clients can run in one process. Every batch goes through the
//! network's [`MessageCodec`] ([`JsonCodec`] by default) on the way, is
//! dropped with the configured probability, and is delivered
//! `latency_ticks` ticks after it was sent.
//!
//! Connection lifecycle events are never dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let network = LoopbackNetwork::new(providers.clone(), LoopbackConfig::default());
//! let server = Server::builder(router).build(Rc::new(network.clone()), providers.clone());
//! server.start();
//!
//! let client = Client::connect(network.connect(), providers, ClientConfig::default());
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::channel::{ClientChannel, ClientEvents, ServerChannel, ServerEvents};
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::LoopbackConfig;
use crate::manifest::Manifest;
use crate::providers::Providers;
use crate::random::RandomProvider;
use crate::task::TaskProvider;
use crate::tick::TickProvider;
use crate::types::ConnectionId;
use crate::wire::{RequestEnvelope, ResponseEnvelope};

/// Message counters of a [`LoopbackNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Batches handed to the network.
    pub sent: u64,
    /// Batches lost to the drop probability.
    pub dropped: u64,
    /// Batches decoded and handed to a receiver.
    pub delivered: u64,
}

struct NetworkInner<P, C> {
    providers: P,
    config: LoopbackConfig,
    codec: C,
    server: RefCell<Option<Rc<dyn ServerEvents>>>,
    clients: RefCell<HashMap<ConnectionId, Option<Rc<dyn ClientEvents>>>>,
    next_connection: Cell<u64>,
    stats: Cell<LoopbackStats>,
}

/// In-memory network. Cloning shares the same network.
pub struct LoopbackNetwork<P: Providers, C: MessageCodec = JsonCodec> {
    inner: Rc<NetworkInner<P, C>>,
}

impl<P: Providers, C: MessageCodec> Clone for LoopbackNetwork<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Providers> LoopbackNetwork<P> {
    /// Create an empty network encoding batches as JSON.
    pub fn new(providers: P, config: LoopbackConfig) -> Self {
        Self::with_codec(providers, config, JsonCodec)
    }
}

impl<P: Providers, C: MessageCodec> LoopbackNetwork<P, C> {
    /// Create an empty network encoding batches with `codec`.
    pub fn with_codec(providers: P, config: LoopbackConfig, codec: C) -> Self {
        Self {
            inner: Rc::new(NetworkInner {
                providers,
                config,
                codec,
                server: RefCell::new(None),
                clients: RefCell::new(HashMap::new()),
                next_connection: Cell::new(1),
                stats: Cell::new(LoopbackStats::default()),
            }),
        }
    }

    /// Open a new connection. The server sees it after the configured
    /// latency.
    pub fn connect(&self) -> Rc<LoopbackClient<P, C>> {
        let connection = ConnectionId::new(self.inner.next_connection.get());
        self.inner.next_connection.set(connection.value() + 1);
        self.inner.clients.borrow_mut().insert(connection, None);
        tracing::debug!(%connection, "loopback connection opened");

        self.after_latency(move |network| {
            if let Some(server) = network.server_events() {
                server.connection_opened(connection);
            }
        });

        Rc::new(LoopbackClient {
            network: self.clone(),
            connection,
        })
    }

    /// Close a connection. The client is told at once, the server after the
    /// configured latency. Batches still in flight to the client are lost.
    pub fn disconnect(&self, connection: ConnectionId) {
        let Some(events) = self.inner.clients.borrow_mut().remove(&connection) else {
            return;
        };
        tracing::debug!(%connection, "loopback connection closed");
        if let Some(events) = events {
            events.disconnected();
        }
        self.after_latency(move |network| {
            if let Some(server) = network.server_events() {
                server.connection_closed(connection);
            }
        });
    }

    /// Open connections.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<ConnectionId> =
            self.inner.clients.borrow().keys().copied().collect();
        connections.sort();
        connections
    }

    /// Counters since creation.
    pub fn stats(&self) -> LoopbackStats {
        self.inner.stats.get()
    }

    fn server_events(&self) -> Option<Rc<dyn ServerEvents>> {
        self.inner.server.borrow().clone()
    }

    fn client_events(&self, connection: ConnectionId) -> Option<Rc<dyn ClientEvents>> {
        self.inner.clients.borrow().get(&connection).cloned().flatten()
    }

    fn update_stats(&self, update: impl FnOnce(&mut LoopbackStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }

    fn after_latency<F>(&self, deliver: F)
    where
        F: FnOnce(&LoopbackNetwork<P, C>) + 'static,
    {
        let network = self.clone();
        let target = self.inner.providers.tick().current_tick()
            + u64::from(self.inner.config.latency_ticks);
        self.inner
            .providers
            .task()
            .spawn_task("chisel_loopback_delivery", async move {
                network.inner.providers.tick().wait_until(target).await;
                deliver(&network);
            });
    }

    /// Encode, maybe drop, then decode and hand `T` to `deliver` after the
    /// configured latency.
    fn transmit<T, F>(&self, what: &'static str, message: &T, deliver: F)
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce(&LoopbackNetwork<P, C>, T) + 'static,
    {
        self.update_stats(|stats| stats.sent += 1);
        let bytes = match self.inner.codec.encode(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(what, error = %err, "failed to encode loopback message");
                return;
            }
        };
        if self
            .inner
            .providers
            .random()
            .random_bool(self.inner.config.drop_probability)
        {
            self.update_stats(|stats| stats.dropped += 1);
            tracing::warn!(
                what,
                codec = self.inner.codec.name(),
                bytes = bytes.len(),
                "loopback message dropped"
            );
            return;
        }

        self.after_latency(move |network| match network.inner.codec.decode::<T>(&bytes) {
            Ok(decoded) => {
                network.update_stats(|stats| stats.delivered += 1);
                deliver(network, decoded);
            }
            Err(err) => tracing::warn!(what, error = %err, "failed to decode loopback message"),
        });
    }
}

impl<P: Providers, C: MessageCodec> ServerChannel for LoopbackNetwork<P, C> {
    fn send_responses(&self, connection: ConnectionId, batch: Vec<ResponseEnvelope>) {
        self.transmit("responses", &batch, move |network, batch: Vec<ResponseEnvelope>| {
            match network.client_events(connection) {
                Some(client) => client.responses_received(batch),
                None => tracing::warn!(%connection, "no client for response batch"),
            }
        });
    }

    fn send_manifest(&self, connection: ConnectionId, manifest: &Manifest) {
        self.transmit("manifest", manifest, move |network, manifest: Manifest| {
            if let Some(client) = network.client_events(connection) {
                client.manifest_received(manifest);
            }
        });
    }

    fn subscribe(&self, events: Rc<dyn ServerEvents>) {
        *self.inner.server.borrow_mut() = Some(events);
    }
}

/// Client end of one loopback connection.
pub struct LoopbackClient<P: Providers, C: MessageCodec = JsonCodec> {
    network: LoopbackNetwork<P, C>,
    connection: ConnectionId,
}

impl<P: Providers, C: MessageCodec> LoopbackClient<P, C> {
    /// The connection this client owns.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Close this connection.
    pub fn disconnect(&self) {
        self.network.disconnect(self.connection);
    }
}

impl<P: Providers, C: MessageCodec> ClientChannel for LoopbackClient<P, C> {
    fn send_requests(&self, batch: Vec<RequestEnvelope>) {
        let connection = self.connection;
        if !self.network.inner.clients.borrow().contains_key(&connection) {
            tracing::warn!(
                %connection,
                batch_size = batch.len(),
                "send on closed loopback connection"
            );
            return;
        }
        self.network
            .transmit("requests", &batch, move |network, batch: Vec<RequestEnvelope>| {
                match network.server_events() {
                    Some(server) => server.requests_received(connection, batch),
                    None => tracing::warn!(%connection, "no server for request batch"),
                }
            });
    }

    fn subscribe(&self, events: Rc<dyn ClientEvents>) {
        if let Some(slot) = self.network.inner.clients.borrow_mut().get_mut(&self.connection) {
            *slot = Some(events);
        }
    }
}
