// Main entry point for the Executr coordinator.

use std::time::Duration;

use anyhow::{Context, Result};
use coordinator_core::jobs::{maintenance, JobStore};
use coordinator_core::server::{build_app, AppState};
use coordinator_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{},sqlx=warn", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Executr coordinator");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.db_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let shutdown = CancellationToken::new();
    let store = JobStore::new(pool.clone());

    tokio::spawn(maintenance::stale_recovery_loop(
        store.clone(),
        config.heartbeat_timeout,
        shutdown.clone(),
    ));
    tokio::spawn(maintenance::retention_loop(
        store.clone(),
        config.cleanup_interval,
        config.job_retention,
        shutdown.clone(),
    ));
    tokio::spawn(maintenance::retry_promotion_loop(
        store.clone(),
        shutdown.clone(),
    ));

    let app = build_app(AppState::new(pool, &config));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    let drain_token = shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { drain_token.cancelled().await });

    // Give in-flight requests 30 s to drain after the signal.
    tokio::select! {
        result = server => result.context("Server error")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        } => {
            tracing::warn!("graceful shutdown deadline exceeded");
        }
    }

    tracing::info!("coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
