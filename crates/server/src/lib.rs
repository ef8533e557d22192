//! Petal server library.
//!
//! Provides a reusable server function to serve Petal either for the binary, or for tests.

#![deny(missing_docs)]

mod auth;
mod client_ip;
mod health;
mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use ::rate_limit::{QuotaManager, Sweeper};
use anyhow::anyhow;
use auth::{JwtValidator, TokenValidator};
use axum::{Json, Router, routing::get};
use config::Config;
use rate_limit::RateLimitLayer;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Configuration for serving Petal.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Petal TOML configuration.
    pub config: Config,
}

/// Starts and runs the Petal server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let mut app = Router::new().route("/", get(info));

    let quota = if config.server.rate_limits.enabled {
        log::debug!("Initializing quota manager with configured tiers");

        let manager = Arc::new(QuotaManager::new(config.server.rate_limits.clone()).await?);
        let sweeper = Sweeper::spawn(manager.clone(), config.server.rate_limits.sweep_interval);

        let validator: Option<Arc<dyn TokenValidator>> = config
            .server
            .auth
            .as_ref()
            .map(|auth| Arc::new(JwtValidator::new(auth)) as Arc<dyn TokenValidator>);

        if validator.is_none() {
            log::debug!("No auth secret configured, every client resolves by address");
        }

        app = app.layer(RateLimitLayer::new(manager.clone(), validator));

        Some((manager, sweeper))
    } else {
        log::debug!("Rate limiting disabled - no quota manager created");
        None
    };

    // Health endpoint stays outside the quota layer, probes never consume requests.
    if config.server.health.enabled {
        let health_router = Router::new().route(&config.server.health.path, get(health::health));
        app = app.merge(health_router);
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Listening on http://{listen_address}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    if let Some((manager, sweeper)) = quota {
        sweeper.stop().await;
        manager.shutdown().await;
    }

    Ok(())
}

async fn info() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => log::error!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    log::info!("Shutdown signal received, flushing quota records");
}
