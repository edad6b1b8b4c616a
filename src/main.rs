//! Relay server entry point
//!
//! Serves the HTTP/WebSocket surface and, when enabled, the UDP game socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_server::app::AppState;
use relay_server::config::Config;
use relay_server::http::build_router;
use relay_server::net::{bind_udp, run_udp_server};
use relay_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting relay server");
    info!("HTTP address: {}", config.http_addr);

    // Create application state and start the tick and sweep loops
    let state = AppState::new(config.clone());
    let relay = state.relay.clone();
    relay.start();

    if config.udp_enabled {
        let socket = bind_udp(config.udp_addr, config.udp_socket_buffer_bytes)?;
        relay.spawn(run_udp_server(relay.clone(), Arc::new(socket)));
    }

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.http_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Client endpoint: ws://{}/ws", addr);
    info!("Upstream endpoint: ws://{}/server", addr);

    let shutdown = relay.shutdown_token().clone();
    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await;

    // Close every connection even when serving failed
    relay.shutdown().await;
    served?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
///
/// Cancelling `shutdown` ends the open socket loops so the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}
