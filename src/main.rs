//! BraidsTag Server - authoritative event log for laser-tag games
//!
//! This is the main entry point for the game server. It handles:
//! - TCP connections from guns, one line-framed envelope per message
//! - Reconciling out-of-order events into a single game state
//! - Periodic pings and out-of-contact detection

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use braidstag::app::AppState;
use braidstag::config::Config;
use braidstag::net::serve;
use braidstag::util::time::{init_server_time, uptime_secs, Clock, SystemClock};
use braidstag::util::timer::TokioScheduler;

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

    info!("Starting BraidsTag Server");
    info!("Server address: {}", config.server_addr);

    // Create application state
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioScheduler::current());
    let state = AppState::new(config.clone(), Arc::clone(&clock), scheduler);

    // Nothing before startup can still arrive
    state.log.adjust_confidence_point(clock.now())?;

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);

    serve(listener, state, shutdown_signal()).await?;

    info!(uptime_secs = uptime_secs(), "Server shutdown complete");
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
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
    }
}
