//! Loopback demo: a chisel server and clients in one process.
//!
//! Registers a small `eggs` namespace, connects clients over the in-memory
//! loopback network and fires a burst of calls per client. Every burst
//! leaves in one request batch and comes back in one response batch.
//!
//! ```bash
//! RUST_LOG=chisel=debug cargo run --bin loopback_demo -- --calls 8 --latency 2
//! ```

use std::rc::Rc;
use std::time::Duration;

use chisel::{
    CallError, Check, Client, ClientConfig, HandlerError, LoopbackConfig, LoopbackNetwork,
    Providers, RequestContext, RouteDefinition, Router, Server, TickProvider, TokioProviders,
    middleware_fn,
};
use clap::Parser;
use futures::future::{LocalBoxFuture, join_all};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "loopback_demo")]
#[command(
    about = "Tick-batched RPC between a server and clients over an in-memory network",
    long_about = None
)]
struct Args {
    /// Number of clients
    #[arg(long, default_value = "2")]
    clients: usize,

    /// Calls issued by each client in the same tick
    #[arg(long, default_value = "5")]
    calls: u32,

    /// Delivery latency in ticks
    #[arg(long, default_value = "1")]
    latency: u32,

    /// Probability that a batch is lost
    #[arg(long, default_value = "0.0")]
    drop_probability: f64,

    /// Tick interval in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Reject calls left unanswered after this many ticks
    #[arg(long)]
    timeout_ticks: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hatch {
    count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hatched {
    chicks: Vec<String>,
}

fn build_router() -> Result<Router, chisel::RegistrationError> {
    let mut router = Router::new();
    router
        .route(
            "health",
            RouteDefinition::sync(Check::any(), Check::any(), |_| Ok(serde_json::json!("ok"))),
        )?
        .namespace("eggs", |eggs| {
            eggs.route(
                "ping",
                RouteDefinition::sync(Check::of::<f64>(), Check::of::<f64>(), |ctx| {
                    Ok(ctx.params)
                }),
            )?;
            eggs.route(
                "hatch",
                RouteDefinition::typed(|ctx: RequestContext<Hatch>| async move {
                    if ctx.params.count > 12 {
                        return Err(HandlerError::new("nest too small"));
                    }
                    let chicks = (0..ctx.params.count)
                        .map(|i| format!("chick-{}-{i}", ctx.connection))
                        .collect();
                    Ok(Hatched { chicks })
                }),
            )?;
            Ok(())
        })?;
    Ok(router)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let timeout_ticks = match args.timeout_ticks {
        None if args.drop_probability > 0.0 => {
            tracing::warn!("lossy network without --timeout-ticks, defaulting to 120");
            Some(120)
        }
        other => other,
    };

    let providers = TokioProviders::with_interval(Duration::from_millis(args.tick_ms));
    let router = build_router()?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let network = LoopbackNetwork::new(
                providers.clone(),
                LoopbackConfig::new()
                    .with_latency(args.latency)
                    .with_drop_probability(args.drop_probability),
            );

            let audit = middleware_fn("audit", |ctx, next| async move {
                let route = ctx.route.clone();
                let connection = ctx.connection;
                let started = ctx.timestamp;
                let result = next.run(ctx).await;
                tracing::info!(
                    %connection,
                    route = %route,
                    ok = result.is_ok(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "call handled"
                );
                result
            });
            let server = Server::builder(router)
                .middleware(audit)
                .build(Rc::new(network.clone()), providers.clone());
            server.start();

            let mut config = ClientConfig::new();
            config.call_timeout_ticks = timeout_ticks;

            let clients: Vec<Client<TokioProviders>> = (0..args.clients)
                .map(|_| Client::connect(network.connect(), providers.clone(), config.clone()))
                .collect();

            // Let connection events and manifests arrive.
            providers
                .tick()
                .wait_ticks(u64::from(args.latency) * 2 + 1)
                .await;

            let mut bursts = Vec::new();
            for (index, client) in clients.iter().enumerate() {
                let eggs = client.namespace("eggs");
                let mut calls = Vec::new();
                for n in 0..args.calls {
                    let call: LocalBoxFuture<'static, Result<f64, CallError>> = match n % 3 {
                        0 => eggs.call::<_, f64>("ping", &f64::from(n)),
                        1 => {
                            let hatch = Hatch { count: n };
                            let reply = eggs.call::<_, Hatched>("hatch", &hatch);
                            Box::pin(async move { reply.await.map(|h| h.chicks.len() as f64) })
                        }
                        _ => eggs.call::<_, f64>("ping", &"not a number"),
                    };
                    calls.push(call);
                }
                tracing::info!(
                    client = index,
                    queued = client.batcher().queued_count(),
                    manifest_routes = client.manifest().map_or(0, |m| m.routes.len()),
                    "burst enqueued"
                );
                bursts.push(join_all(calls));
            }

            for (index, results) in join_all(bursts).await.into_iter().enumerate() {
                for (n, result) in results.into_iter().enumerate() {
                    match result {
                        Ok(value) => tracing::info!(client = index, call = n, value, "call ok"),
                        Err(err) => tracing::info!(
                            client = index,
                            call = n,
                            kind = ?err.kind(),
                            error = %err,
                            "call failed"
                        ),
                    }
                }
            }

            for client in &clients {
                tracing::info!(pending = client.batcher().pending_count(), "client done");
            }
            for connection in network.connections() {
                network.disconnect(connection);
            }
            providers.tick().wait_ticks(u64::from(args.latency) + 1).await;
            tracing::info!(stats = ?network.stats(), "network closed");
        })
        .await;

    Ok(())
}
