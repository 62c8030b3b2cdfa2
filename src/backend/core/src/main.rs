//! EdgeSwarm coordinator - main entry point.
//!
//! Accepts worker registrations on a single TCP port and auctions
//! inference requests over the live fleet.

use std::sync::Arc;

use edgeswarm_core::config::Config;
use edgeswarm_core::coordinator::Coordinator;
use edgeswarm_core::telemetry;

use clap::Parser;

#[derive(Parser)]
#[command(name = "edgeswarm-coordinator", about = "EdgeSwarm coordinator")]
struct Cli {
    /// Configuration file (environment variables override it)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };

    telemetry::init_logging(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.coordinator.port,
        max_workers = config.coordinator.max_workers,
        "Starting EdgeSwarm coordinator"
    );

    let coordinator = Arc::new(Coordinator::new(config.coordinator));
    let listener = coordinator.bind().await?;

    tokio::select! {
        result = coordinator.serve(listener) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Accept loop failed");
            }
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
