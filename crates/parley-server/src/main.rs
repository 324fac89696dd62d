mod config;
mod routes;
mod sweep;

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use parley_api::auth::{self, AppStateInner};
use parley_core::credentials::Credentials;
use parley_db::Database;
use parley_gateway::Dispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    if let Some((username, password)) = &config.admin {
        auth::seed_admin(&db, username, password).await?;
    }

    // Shared state
    let dispatcher = Dispatcher::new();
    let credentials = Credentials::new(&config.jwt_secret, Duration::hours(config.token_ttl_hours));
    let state = AppStateInner::new(db, dispatcher.clone(), credentials);

    if config.pin_sweep_secs > 0 {
        tokio::spawn(sweep::run_pin_sweep_loop(state.clone(), config.pin_sweep_secs));
        info!("Pin sweep every {}s", config.pin_sweep_secs);
    } else {
        warn!("Periodic pin sweep disabled; expiry is applied on read only");
    }

    let app = routes::build_router(state);

    let addr = config.bind_addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.clear().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
