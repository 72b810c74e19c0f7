//! Server side: the transport orchestrator.
//!
//! A [`Server`] subscribes to a [`ServerChannel`] and, for every received
//! request batch, runs each call as its own local task through the
//! middleware chain wrapping [`Router::dispatch_context`]. Calls of one
//! batch run concurrently; each outcome lands in its connection's outbox in
//! completion order.
//!
//! # Flushing
//!
//! The first response settled into an idle outbox schedules one flush on the
//! next tick. That flush sends everything accumulated since, so a connection
//! receives at most one response batch per tick, possibly covering several
//! request batches.
//!
//! # Failure isolation
//!
//! Every failure of a call, including a panic in its handler, becomes an
//! `{ok: false}` response for that call only.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = Server::builder(router)
//!     .middleware(audit)
//!     .config(ServerConfig::default())
//!     .build(channel, TokioProviders::new());
//! server.start();
//! ```

mod connection;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use futures::FutureExt;

use self::connection::ConnectionState;
use crate::channel::{ServerChannel, ServerEvents};
use crate::config::ServerConfig;
use crate::error::DispatchError;
use crate::manifest::Manifest;
use crate::middleware::{Chained, Middleware, MiddlewareChain};
use crate::providers::Providers;
use crate::router::{RequestContext, Router};
use crate::task::TaskProvider;
use crate::tick::TickProvider;
use crate::types::ConnectionId;
use crate::wire::{RequestEnvelope, ResponseEnvelope};

/// Configures a [`Server`].
pub struct ServerBuilder {
    router: Router,
    middleware: MiddlewareChain,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Append a middleware. Middleware run in the order they are added.
    pub fn middleware(mut self, middleware: Rc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the whole middleware chain.
    pub fn middleware_chain(mut self, chain: MiddlewareChain) -> Self {
        self.middleware = chain;
        self
    }

    /// Set the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the server and its manifest. Call [`Server::start`] to begin
    /// receiving traffic.
    pub fn build<C, P>(self, channel: Rc<C>, providers: P) -> Server<C, P>
    where
        C: ServerChannel + 'static,
        P: Providers,
    {
        let manifest = Manifest::build(self.router.tree(), providers.random());
        let router = Rc::new(self.router);
        let terminal = Rc::clone(&router);
        let pipeline = self.middleware.wrap(move |ctx: RequestContext| {
            let router = Rc::clone(&terminal);
            async move { router.dispatch_context(ctx).await }
        });

        Server {
            inner: Rc::new(ServerInner {
                router,
                pipeline,
                channel,
                providers,
                config: self.config,
                manifest,
                connections: RefCell::new(HashMap::new()),
                next_session: Cell::new(1),
            }),
        }
    }
}

/// Transport orchestrator. Cloning shares the same server.
pub struct Server<C, P> {
    inner: Rc<ServerInner<C, P>>,
}

impl<C, P> Clone for Server<C, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

struct ServerInner<C, P> {
    router: Rc<Router>,
    pipeline: Chained,
    channel: Rc<C>,
    providers: P,
    config: ServerConfig,
    manifest: Manifest,
    connections: RefCell<HashMap<ConnectionId, ConnectionState>>,
    next_session: Cell<u64>,
}

impl Server<(), ()> {
    /// Start configuring a server around `router`.
    pub fn builder(router: Router) -> ServerBuilder {
        ServerBuilder {
            router,
            middleware: MiddlewareChain::new(),
            config: ServerConfig::default(),
        }
    }
}

impl<C, P> Server<C, P>
where
    C: ServerChannel + 'static,
    P: Providers,
{
    /// Subscribe to the channel.
    pub fn start(&self) {
        tracing::info!(
            routes = self.inner.manifest.routes.len(),
            version = self.inner.manifest.version,
            "server started"
        );
        self.inner.channel.subscribe(Rc::new(ServerReceiver {
            inner: Rc::downgrade(&self.inner),
        }));
    }

    /// Manifest built when the server was created.
    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    /// The router calls are dispatched to.
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Calls of `connection` still running. Zero for unknown connections.
    pub fn in_flight(&self, connection: ConnectionId) -> usize {
        self.inner
            .connections
            .borrow()
            .get(&connection)
            .map_or(0, ConnectionState::in_flight)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.borrow().len()
    }
}

impl<C, P> ServerInner<C, P>
where
    C: ServerChannel + 'static,
    P: Providers,
{
    fn new_state(&self) -> ConnectionState {
        let session = self.next_session.get();
        self.next_session.set(session + 1);
        ConnectionState::new(session)
    }

    fn open(&self, connection: ConnectionId) {
        let state = self.new_state();
        let session = state.session();
        if let Some(previous) = self.connections.borrow_mut().insert(connection, state) {
            tracing::debug!(
                %connection,
                previous = previous.session(),
                in_flight = previous.in_flight(),
                "connection reopened, abandoning previous session"
            );
        }
        tracing::debug!(%connection, session, "connection opened");
        if self.config.push_manifest {
            self.channel.send_manifest(connection, &self.manifest);
        }
    }

    fn close(&self, connection: ConnectionId) {
        if let Some(state) = self.connections.borrow_mut().remove(&connection) {
            tracing::debug!(%connection, in_flight = state.in_flight(), "connection closed");
        }
    }

    fn accept(this: &Rc<Self>, connection: ConnectionId, batch: Vec<RequestEnvelope>) {
        tracing::debug!(%connection, batch_size = batch.len(), "request batch received");
        let session = {
            let mut connections = this.connections.borrow_mut();
            let state = connections.entry(connection).or_insert_with(|| {
                tracing::debug!(%connection, "requests from unannounced connection");
                this.new_state()
            });
            state.begin(batch.len());
            state.session()
        };

        for envelope in batch {
            let server = Rc::clone(this);
            this.providers
                .task()
                .spawn_task("chisel_dispatch", async move {
                    let id = envelope.id;
                    let fqn = envelope.fqn.clone();
                    let ctx = RequestContext::new(connection, envelope.fqn, envelope.payload);
                    let outcome = server.run(ctx).await;
                    match &outcome {
                        Ok(_) => tracing::trace!(%connection, id, fqn = %fqn, "call succeeded"),
                        Err(err) => tracing::trace!(
                            %connection,
                            id,
                            fqn = %fqn,
                            error = %err,
                            "call failed"
                        ),
                    }
                    Self::settle(&server, connection, session, (id, outcome).into());
                });
        }
    }

    async fn run(&self, ctx: RequestContext) -> Result<serde_json::Value, DispatchError> {
        let fqn = ctx.route.clone();
        let pipeline = self.pipeline.clone();
        let result = AssertUnwindSafe(async move { pipeline.call(ctx).await })
            .catch_unwind()
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(fqn = %fqn, panic_message = %message, "handler panicked");
                Err(DispatchError::handler("handler panicked"))
            }
        }
    }

    fn settle(
        this: &Rc<Self>,
        connection: ConnectionId,
        session: u64,
        response: ResponseEnvelope,
    ) {
        let schedule = match this.connections.borrow_mut().get_mut(&connection) {
            Some(state) if state.session() == session => state.settle(response),
            Some(state) => {
                tracing::warn!(
                    %connection,
                    id = response.id,
                    session,
                    current = state.session(),
                    "dropping response for previous session"
                );
                return;
            }
            None => {
                tracing::warn!(
                    %connection,
                    id = response.id,
                    "dropping response for closed connection"
                );
                return;
            }
        };

        if schedule {
            let target = this.providers.tick().current_tick() + 1;
            let server = Rc::clone(this);
            this.providers
                .task()
                .spawn_task("chisel_response_flush", async move {
                    server.providers.tick().wait_until(target).await;
                    server.flush(connection, session);
                });
        }
    }

    fn flush(&self, connection: ConnectionId, session: u64) {
        let batch = match self.connections.borrow_mut().get_mut(&connection) {
            Some(state) if state.session() == session => state.take(),
            _ => return,
        };
        if batch.is_empty() {
            return;
        }
        tracing::debug!(%connection, batch_size = batch.len(), "flushing response batch");
        self.channel.send_responses(connection, batch);
    }
}

/// Channel-facing receiver holding the server weakly.
struct ServerReceiver<C, P> {
    inner: Weak<ServerInner<C, P>>,
}

impl<C, P> ServerEvents for ServerReceiver<C, P>
where
    C: ServerChannel + 'static,
    P: Providers,
{
    fn connection_opened(&self, connection: ConnectionId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.open(connection);
        }
    }

    fn connection_closed(&self, connection: ConnectionId) {
        if let Some(inner) = self.inner.upgrade() {
            inner.close(connection);
        }
    }

    fn requests_received(&self, connection: ConnectionId, batch: Vec<RequestEnvelope>) {
        match self.inner.upgrade() {
            Some(inner) => ServerInner::accept(&inner, connection, batch),
            None => tracing::warn!(%connection, "server dropped, discarding request batch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::future::Future;

    use serde_json::{Value, json};

    use super::*;
    use crate::error::{ErrorKind, HandlerError};
    use crate::middleware::middleware_fn;
    use crate::providers::ManualProviders;
    use crate::router::{Check, RouteDefinition};

    #[derive(Default)]
    struct RecordingChannel {
        responses: RefCell<Vec<(ConnectionId, Vec<ResponseEnvelope>)>>,
        manifests: RefCell<Vec<(ConnectionId, Manifest)>>,
        events: RefCell<Option<Rc<dyn ServerEvents>>>,
    }

    impl RecordingChannel {
        fn events(&self) -> Rc<dyn ServerEvents> {
            self.events.borrow().clone().expect("subscribed")
        }
    }

    impl ServerChannel for RecordingChannel {
        fn send_responses(&self, connection: ConnectionId, batch: Vec<ResponseEnvelope>) {
            self.responses.borrow_mut().push((connection, batch));
        }

        fn send_manifest(&self, connection: ConnectionId, manifest: &Manifest) {
            self.manifests.borrow_mut().push((connection, manifest.clone()));
        }

        fn subscribe(&self, events: Rc<dyn ServerEvents>) {
            *self.events.borrow_mut() = Some(events);
        }
    }

    fn run_local<F: Future>(future: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .expect("runtime");
        tokio::task::LocalSet::new().block_on(&rt, future)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .namespace("eggs", |eggs| {
                eggs.route(
                    "ping",
                    RouteDefinition::sync(Check::of::<f64>(), Check::of::<f64>(), |ctx| {
                        Ok(ctx.params)
                    }),
                )?;
                eggs.route(
                    "slow",
                    RouteDefinition::typed(|ctx: RequestContext<u64>| async move {
                        tokio::task::yield_now().await;
                        Ok::<_, HandlerError>(ctx.params + 1)
                    }),
                )?;
                eggs.route(
                    "explode",
                    RouteDefinition::sync(
                        Check::any(),
                        Check::any(),
                        |_| -> Result<Value, HandlerError> { panic!("yolk everywhere") },
                    ),
                )?;
                Ok(())
            })
            .expect("eggs");
        router
    }

    fn request(id: u64, fqn: &str, payload: Value) -> RequestEnvelope {
        RequestEnvelope {
            id,
            fqn: fqn.to_string(),
            payload,
        }
    }

    fn sorted(mut batch: Vec<ResponseEnvelope>) -> Vec<ResponseEnvelope> {
        batch.sort_by_key(|response| response.id);
        batch
    }

    #[test]
    fn test_manifest_pushed_on_open() {
        run_local(async {
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), ManualProviders::new());
            server.start();

            channel.events().connection_opened(ConnectionId::new(1));
            let manifests = channel.manifests.borrow();
            assert_eq!(manifests.len(), 1);
            assert_eq!(manifests[0].0, ConnectionId::new(1));
            assert_eq!(&manifests[0].1, server.manifest());
            assert!(server.manifest().contains_route("eggs.ping"));
        });
    }

    #[test]
    fn test_manifest_push_can_be_disabled() {
        run_local(async {
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router())
                .config(ServerConfig::new().with_manifest_push(false))
                .build(channel.clone(), ManualProviders::new());
            server.start();

            channel.events().connection_opened(ConnectionId::new(1));
            assert!(channel.manifests.borrow().is_empty());
            assert_eq!(server.connection_count(), 1);
        });
    }

    #[test]
    fn test_batch_answered_on_next_tick() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel.events().requests_received(
                conn,
                vec![
                    request(1, "eggs.ping", json!(42)),
                    request(2, "eggs.ping", json!("not a number")),
                    request(3, "eggs.slow", json!(9)),
                ],
            );
            settle().await;
            assert!(channel.responses.borrow().is_empty());
            assert_eq!(server.in_flight(conn), 0);

            providers.advance();
            settle().await;

            let responses = channel.responses.borrow();
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].0, conn);
            let batch = sorted(responses[0].1.clone());
            assert_eq!(batch[0], ResponseEnvelope::success(1, json!(42)));
            assert!(!batch[1].ok);
            assert_eq!(batch[1].err.as_deref(), Some("bad_request:eggs.ping"));
            assert_eq!(batch[1].kind, Some(ErrorKind::BadRequest));
            assert_eq!(batch[2], ResponseEnvelope::success(3, json!(10)));
        });
    }

    #[test]
    fn test_batches_within_a_tick_coalesce() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel
                .events()
                .requests_received(conn, vec![request(1, "eggs.ping", json!(1))]);
            channel
                .events()
                .requests_received(conn, vec![request(2, "eggs.ping", json!(2))]);
            settle().await;
            providers.advance();
            settle().await;

            let responses = channel.responses.borrow();
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].1.len(), 2);
        });
    }

    #[test]
    fn test_connections_flush_separately() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let (a, b) = (ConnectionId::new(1), ConnectionId::new(2));
            channel.events().connection_opened(a);
            channel.events().connection_opened(b);

            channel
                .events()
                .requests_received(a, vec![request(1, "eggs.ping", json!(1))]);
            channel
                .events()
                .requests_received(b, vec![request(1, "eggs.ping", json!(2))]);
            settle().await;
            providers.advance();
            settle().await;

            let responses = channel.responses.borrow();
            assert_eq!(responses.len(), 2);
            let mut targets: Vec<ConnectionId> = responses.iter().map(|(conn, _)| *conn).collect();
            targets.sort();
            assert_eq!(targets, vec![a, b]);
        });
    }

    #[test]
    fn test_panic_is_isolated() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel.events().requests_received(
                conn,
                vec![
                    request(1, "eggs.explode", json!(null)),
                    request(2, "eggs.ping", json!(5)),
                ],
            );
            settle().await;
            providers.advance();
            settle().await;

            let batch = sorted(channel.responses.borrow()[0].1.clone());
            assert_eq!(batch[0].err.as_deref(), Some("handler_failed:handler panicked"));
            assert_eq!(batch[0].kind, Some(ErrorKind::HandlerFailure));
            assert_eq!(batch[1], ResponseEnvelope::success(2, json!(5)));
        });
    }

    #[test]
    fn test_middleware_wraps_dispatch() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let seen = Rc::new(Cell::new(0));
            let counter = seen.clone();
            let server = Server::builder(router())
                .middleware(middleware_fn("count", move |ctx, next| {
                    counter.set(counter.get() + 1);
                    async move { next.run(ctx).await }
                }))
                .middleware(middleware_fn("deny_slow", |ctx, next| async move {
                    if ctx.route == "eggs.slow" {
                        return Err(DispatchError::handler("rate limited"));
                    }
                    next.run(ctx).await
                }))
                .build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel.events().requests_received(
                conn,
                vec![request(1, "eggs.ping", json!(1)), request(2, "eggs.slow", json!(1))],
            );
            settle().await;
            providers.advance();
            settle().await;

            assert_eq!(seen.get(), 2);
            let batch = sorted(channel.responses.borrow()[0].1.clone());
            assert!(batch[0].ok);
            assert_eq!(batch[1].err.as_deref(), Some("handler_failed:rate limited"));
        });
    }

    #[test]
    fn test_closed_connection_drops_late_responses() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel
                .events()
                .requests_received(conn, vec![request(1, "eggs.slow", json!(1))]);
            assert_eq!(server.in_flight(conn), 1);
            channel.events().connection_closed(conn);
            assert_eq!(server.connection_count(), 0);

            settle().await;
            providers.advance();
            settle().await;
            assert!(channel.responses.borrow().is_empty());
        });
    }

    #[test]
    fn test_reopened_connection_ignores_previous_session() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();
            let conn = ConnectionId::new(1);
            channel.events().connection_opened(conn);

            channel
                .events()
                .requests_received(conn, vec![request(1, "eggs.slow", json!(1))]);
            channel.events().connection_closed(conn);
            channel.events().connection_opened(conn);
            assert_eq!(server.in_flight(conn), 0);

            settle().await;
            providers.advance();
            settle().await;
            assert!(channel.responses.borrow().is_empty());

            channel
                .events()
                .requests_received(conn, vec![request(1, "eggs.ping", json!(7))]);
            settle().await;
            providers.advance();
            settle().await;

            let responses = channel.responses.borrow();
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].1, vec![ResponseEnvelope::success(1, json!(7))]);
        });
    }

    #[test]
    fn test_unannounced_connection_is_served() {
        run_local(async {
            let providers = ManualProviders::new();
            let channel = Rc::new(RecordingChannel::default());
            let server = Server::builder(router()).build(channel.clone(), providers.clone());
            server.start();

            channel
                .events()
                .requests_received(ConnectionId::new(4), vec![request(1, "nope.ping", json!(1))]);
            settle().await;
            providers.advance();
            settle().await;

            let responses = channel.responses.borrow();
            assert_eq!(responses[0].1[0].err.as_deref(), Some("ns_not_found:nope"));
        });
    }
}
