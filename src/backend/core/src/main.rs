//! Portal Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use portal_core::{
    api::{self, AppState},
    config::Config,
    registration::{InMemoryAccountStore, LogMailer, RegistrationHandler, RegistrationQueue},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("PORTAL_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => Config::load().context("failed to load config")?,
    };

    let telemetry = telemetry::init_telemetry(&config.telemetry_config())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting Portal Server"
    );

    // Registration queue, one per process
    let handler = RegistrationHandler::new(
        Arc::new(InMemoryAccountStore::new()),
        Arc::new(LogMailer::new(config.registration.mail_sender.clone())),
        config.registration.verification_base_url.clone(),
    );
    let queue = RegistrationQueue::new(config.queue_config(), handler)?;
    let sweeper = queue.spawn_sweeper();
    tracing::info!(
        max_concurrency = queue.config().max_concurrency,
        max_pending = queue.config().max_pending,
        clear_enabled = queue.config().allow_clear,
        "Registration queue initialized"
    );

    if config.admin.token.is_none() {
        tracing::warn!("No admin token configured; admin routes are unauthenticated");
    }

    let app_state = AppState::new(queue.clone(), telemetry.metrics.clone())
        .with_admin_token(config.admin.token.clone());
    let app = api::build_router(app_state);

    // Start server
    let ip = config
        .server
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("invalid server.host {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    queue.shutdown();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    let drained = queue.drain(config.server.shutdown_grace).await;
    if !drained {
        tracing::warn!(
            processing = queue.snapshot().processing,
            "Shutdown grace period elapsed with jobs still running"
        );
    }

    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
