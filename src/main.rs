use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora::app::auth::TokenService;
use agora::app::channels::{ChannelHub, Pusher};
use agora::app::events::EventBus;
use agora::app::notifications::NotificationService;
use agora::config::{AppConfig, StoreBackend};
use agora::infra::db::Db;
use agora::infra::relay::RedisRelay;
use agora::infra::store::{MemoryStore, PgStore, Store};
use agora::jobs::notification_fanout::{self, FanoutHandler};
use agora::jobs::notification_cleanup;
use agora::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let db = Db::connect(&config).await?;
            if config.db_apply_migrations {
                db.apply_migrations(Path::new("migrations")).await?;
            }
            Arc::new(PgStore::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = ChannelHub::new();
    let relay = match &config.redis_url {
        Some(url) => {
            let relay = RedisRelay::connect(url).await?;
            relay.spawn_subscriber(hub.clone());
            Some(relay)
        }
        None => None,
    };
    let pusher: Arc<dyn Pusher> = match &relay {
        Some(relay) => Arc::new(relay.clone()),
        None => Arc::new(hub.clone()),
    };

    let (bus, receivers) = EventBus::new(config.notification_workers);
    tracing::info!(shards = bus.shard_count(), "starting notification workers");
    let handler = Arc::new(FanoutHandler::new(
        store.clone(),
        pusher,
        Duration::from_millis(config.push_timeout_ms),
    ));
    let workers = notification_fanout::spawn_workers(receivers, handler);

    let sweeper = tokio::spawn(notification_cleanup::run(
        NotificationService::new(store.clone()),
        time::Duration::days(config.notification_retention_days),
        Duration::from_secs(config.retention_sweep_interval_seconds),
    ));

    let state = AppState {
        store,
        events: Arc::new(bus),
        hub,
        relay,
        tokens: TokenService::new(config.paseto_access_key, config.access_ttl_minutes),
        comment_max_depth: config.comment_max_depth,
    };

    let app: Router = http::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the router held the last event senders; let workers drain what is queued
    sweeper.abort();
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "notification worker ended abnormally");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
