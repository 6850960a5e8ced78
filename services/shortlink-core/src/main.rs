mod analytics;
mod broker;
mod config;
mod error;
mod handlers;
mod l1_cache;
mod metrics;
mod models;
mod queue;
mod remote_cache;
mod resolver;
mod shortcode;
mod state;
mod store;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use prometheus::Registry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::broker::Broker;
use crate::l1_cache::L1Cache;
use crate::queue::IngestQueue;
use crate::remote_cache::RedisCache;
use crate::resolver::Resolver;
use crate::store::{create_pool, migrate, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(app = %config.app_name, env = %config.app_env, "starting shortlink-core");

    let pool = create_pool(&config.database_url).await?;
    migrate(&pool).await?;
    tracing::info!("database ready");
    let store: Arc<dyn store::PrimaryStore> = Arc::new(PgStore::new(pool));

    let remote_cache = RedisCache::connect_with_replica(
        &config.redis_url,
        config.redis_replica_url.as_deref(),
        config.remote_cache_timeout,
    )
    .await?;
    tracing::info!("remote cache ready");
    let remote: Arc<dyn remote_cache::RemoteCache> = Arc::new(remote_cache);

    let l1 = Arc::new(L1Cache::new());
    let resolver = Arc::new(Resolver::new(
        l1.clone(),
        store.clone(),
        remote.clone(),
        config.resolver_store_timeout,
        config.remote_url_ttl_seconds,
    ));
    let warmed = resolver.warm_l1().await?;
    tracing::info!(warmed, "L1 cache pre-populated from primary store");

    let queue = IngestQueue::new(config.ingest_queue_capacity);
    let broker = Arc::new(Broker::new());

    let registry = Registry::new();
    let app_metrics = Arc::new(metrics::init(&registry));

    let worker_handles = worker::spawn_workers(
        config.worker_count,
        queue.receiver(),
        store.clone(),
        broker.clone(),
        app_metrics.clone(),
        config.batch_size,
        config.batch_timeout,
    );
    tracing::info!(workers = config.worker_count, "worker pool started");

    let port = config.port;
    let shutdown_drain = config.shutdown_drain;
    let shutdown_timeout = config.shutdown_timeout;
    let broker_for_shutdown = broker.clone();
    let state = state::AppState::new(
        config,
        l1,
        store,
        remote,
        resolver,
        queue.clone(),
        broker,
        app_metrics,
        registry,
        true, // warm_l1() above already completed successfully
    );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/api/links", post(handlers::create_link).get(handlers::list_links))
        .route("/api/links/:short_code", get(handlers::get_link))
        .route("/api/track/:short_code", post(handlers::track))
        .route("/api/analytics/:short_code", get(handlers::get_analytics))
        .route(
            "/api/analytics/:short_code/stream",
            get(handlers::stream_analytics),
        )
        .route("/:short_code", get(handlers::redirect))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_and_close_broker(broker_for_shutdown));

    // Graceful shutdown (§5): stop accepting connections, close every live
    // subscriber's stream, flush worker tail batches, then exit. A live
    // `/api/analytics/:code/stream` response body only ends once its
    // `Subscription::recv()` returns `None`, i.e. once the broker drops its
    // mailbox — `shutdown_signal_and_close_broker` does that the moment the
    // signal fires, so `serve_fut` can actually resolve. The outer timeout
    // is a hard backstop so the process still exits within the 12s budget
    // (2s worker drain + 10s shutdown timeout, §8 scenario 6) even if some
    // connection never closes on its own.
    match tokio::time::timeout(shutdown_timeout, serve_fut).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err.into()),
        Err(_) => {
            tracing::warn!("server did not finish draining connections within the shutdown timeout, forcing close");
        }
    }

    // Close the ingest queue so each worker's receive loop observes
    // `Closed`, flushes its tail batch, and exits on its own. Workers still
    // running after the drain grace period are abandoned rather than left
    // to block process exit indefinitely.
    queue.close();
    let drain = futures::future::join_all(worker_handles);
    if tokio::time::timeout(shutdown_drain, drain).await.is_err() {
        tracing::warn!("worker drain exceeded grace period, some batches may be incomplete");
    }

    Ok(())
}

/// Waits for the shutdown signal, then immediately drops every broker
/// mailbox so in-flight SSE streams observe `recv() -> None` and their
/// response bodies end, letting the graceful-shutdown future complete.
async fn shutdown_signal_and_close_broker(broker: Arc<Broker>) {
    shutdown_signal().await;
    tracing::info!("closing subscriber streams");
    broker.close_all();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight work");
}
