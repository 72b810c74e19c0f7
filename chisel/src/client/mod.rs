//! Client side: batching, correlation and the call API.
//!
//! A [`Client`] owns one [`Batcher`] bound to a [`ClientChannel`]. Every
//! call made during a tick leaves in one request batch on the next tick;
//! responses are matched back to callers by id.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = Client::connect(channel, TokioProviders::new(), ClientConfig::default());
//!
//! let pong: u32 = client.call("eggs.ping", &42u32).await?;
//!
//! let eggs = client.namespace("eggs");
//! let count: u32 = eggs.call("count", &()).await?;
//! ```

mod batcher;
mod reply_future;

pub use batcher::Batcher;
pub use reply_future::ReplyFuture;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::channel::{ClientChannel, ClientEvents};
use crate::config::ClientConfig;
use crate::error::CallError;
use crate::manifest::Manifest;
use crate::providers::Providers;
use crate::wire::ResponseEnvelope;

struct ClientInner<P: Providers> {
    batcher: Batcher<P>,
    manifest: RefCell<Option<Manifest>>,
    connected: Cell<bool>,
}

/// Handle to a batching RPC client. Cloning shares the connection.
pub struct Client<P: Providers> {
    inner: Rc<ClientInner<P>>,
}

impl<P: Providers> Clone for Client<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Providers> Client<P> {
    /// Bind a client to `channel` and subscribe to its events.
    pub fn connect<C>(channel: Rc<C>, providers: P, config: ClientConfig) -> Self
    where
        C: ClientChannel + 'static,
    {
        let outbound = Rc::clone(&channel);
        let batcher = Batcher::new(providers, &config, move |batch| {
            outbound.send_requests(batch);
        });
        let inner = Rc::new(ClientInner {
            batcher,
            manifest: RefCell::new(None),
            connected: Cell::new(true),
        });
        channel.subscribe(Rc::new(ClientReceiver {
            inner: Rc::downgrade(&inner),
        }));
        Self { inner }
    }

    /// Call `fqn` with a raw payload.
    ///
    /// Enqueues immediately; the returned future settles once the response
    /// arrives. After a disconnect it settles with
    /// [`CallError::ConnectionClosed`] without sending anything.
    pub fn call_value(&self, fqn: &str, payload: Value) -> ReplyFuture {
        if !self.inner.connected.get() {
            return ReplyFuture::failed(CallError::ConnectionClosed);
        }
        self.inner.batcher.enqueue(fqn, payload)
    }

    /// Call `fqn` with typed input and output.
    ///
    /// The call is enqueued before this returns.
    pub fn call<In, Out>(
        &self,
        fqn: &str,
        input: &In,
    ) -> LocalBoxFuture<'static, Result<Out, CallError>>
    where
        In: Serialize + ?Sized,
        Out: DeserializeOwned + 'static,
    {
        let reply = serde_json::to_value(input)
            .map(|payload| self.call_value(fqn, payload))
            .map_err(|err| CallError::Encode {
                message: err.to_string(),
            });
        Box::pin(async move {
            let value = reply?.await?;
            serde_json::from_value(value).map_err(|err| CallError::Decode {
                message: err.to_string(),
            })
        })
    }

    /// Helper whose calls are prefixed with `prefix.`.
    pub fn namespace(&self, prefix: &str) -> NamespaceClient<P> {
        NamespaceClient {
            client: self.clone(),
            prefix: prefix.to_string(),
        }
    }

    /// Last manifest pushed by the server, if any arrived.
    pub fn manifest(&self) -> Option<Manifest> {
        self.inner.manifest.borrow().clone()
    }

    /// Whether the channel is still open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// The underlying batcher.
    pub fn batcher(&self) -> &Batcher<P> {
        &self.inner.batcher
    }
}

/// Calls scoped to one namespace.
pub struct NamespaceClient<P: Providers> {
    client: Client<P>,
    prefix: String,
}

impl<P: Providers> NamespaceClient<P> {
    /// The namespace prefix, without the trailing dot.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Raw call to `prefix.name`.
    pub fn call_value(&self, name: &str, payload: Value) -> ReplyFuture {
        self.client.call_value(&self.fqn(name), payload)
    }

    /// Typed call to `prefix.name`.
    pub fn call<In, Out>(
        &self,
        name: &str,
        input: &In,
    ) -> LocalBoxFuture<'static, Result<Out, CallError>>
    where
        In: Serialize + ?Sized,
        Out: DeserializeOwned + 'static,
    {
        self.client.call(&self.fqn(name), input)
    }

    fn fqn(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }
}

/// Channel-facing receiver. Holds the client weakly so a channel keeping its
/// subscriber alive does not keep the client alive.
struct ClientReceiver<P: Providers> {
    inner: Weak<ClientInner<P>>,
}

impl<P: Providers> ClientEvents for ClientReceiver<P> {
    fn responses_received(&self, batch: Vec<ResponseEnvelope>) {
        match self.inner.upgrade() {
            Some(inner) => inner.batcher.on_responses(batch),
            None => {
                tracing::trace!(batch_size = batch.len(), "client dropped, discarding responses")
            }
        }
    }

    fn manifest_received(&self, manifest: Manifest) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::debug!(
                version = manifest.version,
                routes = manifest.routes.len(),
                "manifest received"
            );
            *inner.manifest.borrow_mut() = Some(manifest);
        }
    }

    fn disconnected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::debug!(pending = inner.batcher.pending_count(), "client disconnected");
            inner.connected.set(false);
            inner.batcher.reject_all(CallError::ConnectionClosed);
        }
    }
}
