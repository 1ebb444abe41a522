//! # ecomerce-rs
//!
//! Session-authenticated product catalog server with server-side rendered views.
//!
//! ## Architecture
//!
//! - **Store**: the `productos` collection of the `Ecomerce` database, in memory or
//!   persisted to a JSON snapshot, reached through a bounded connection pool
//! - **Users**: in-memory registration and credential lookup, optionally seeded from TOML
//! - **Sessions**: cookie token -> user, expiring after a configurable TTL
//! - **HTTP**: Axum router with rate limiting, request IDs, and graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod config;
mod http;
mod store;
mod users;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Cli};
use crate::http::{router, AppState, SessionStore};
use crate::store::{load_seed_file, StoreGateway};
use crate::users::{load_users_file, InMemoryUsers, UserRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_logging().context("failed to initialize logging")?;
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "loaded environment file");
    }

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli).context("failed to load configuration")?;

    let seed_users = load_users_file(config.users_file.as_deref())
        .context("failed to load users file")?;
    let users = InMemoryUsers::from_users(seed_users);

    info!(
        bind = %config.bind,
        store = ?config.store.location,
        database = %config.store.database,
        collection = %config.store.collection,
        pool_size = config.store.pool_size,
        acquire_timeout = %humantime::format_duration(config.store.acquire_timeout),
        session_ttl = %humantime::format_duration(config.session_ttl),
        seeded_users = users.count(),
        "configuration loaded"
    );

    let collection = config
        .store
        .location
        .open(&config.store.database, &config.store.collection)
        .context("failed to open product store")?;
    let store = StoreGateway::new(
        collection,
        config.store.pool_size,
        config.store.acquire_timeout,
    );

    if let Some(seed_path) = config.seed_file.as_deref() {
        let products = load_seed_file(seed_path)
            .with_context(|| format!("failed to read seed file {}", seed_path.display()))?;
        let inserted = store
            .seed(products)
            .await
            .context("failed to seed product store")?;
        info!(inserted, path = %seed_path.display(), "product seed applied");
    }

    let sessions = SessionStore::new(config.session_ttl);
    spawn_session_sweeper(sessions.clone(), config.session_ttl);

    let state = AppState {
        users: Arc::new(users),
        sessions,
        store: store.clone(),
    };

    let app = router(state, config.rate_limit);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "ecomerce-rs listening on http://{}", config.bind);

    serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
            info!("shutting down gracefully");
            store.close();
        })
        .await
        .context("server exited with error")
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

/// Spawns a background task that drops expired sessions. Runs at the session TTL,
/// but no more often than once a second.
fn spawn_session_sweeper(sessions: SessionStore, ttl: Duration) {
    let interval = ttl.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = sessions.len(), "expired sessions purged");
            }
        }
    });
}
