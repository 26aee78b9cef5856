//! Manufacturing cell server

use anyhow::Context;
use clap::Parser;
use fmc_bus::Broker;
use fmc_config::{CellConfig, load_cell_config};
use fmc_scheduler::CellOrchestrator;
use fmc_server::{AppState, routes};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fmc-server")]
#[command(about = "Manufacturing cell scheduler server", long_about = None)]
struct Args {
    /// Cell configuration file
    #[arg(long, env = "FMC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long, env = "FMC_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_cell_config(path)
            .with_context(|| format!("Failed to load cell config: {}", path.display()))?,
        None => {
            info!("No cell config given; using defaults");
            CellConfig::default()
        }
    };

    let broker = Arc::new(Broker::new(config.server.bus_capacity));
    let launcher = fmc_launcher::from_config(&config.launcher, broker.clone(), &config.topics);
    info!(launcher = launcher.name(), "Session launcher ready");

    let cell = CellOrchestrator::from_config(&config, broker.clone(), launcher)
        .spawn()
        .context("Failed to start cell orchestrator")?;

    let state = AppState::new(broker, config.topics.clone());

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = args.bind.unwrap_or(config.server.bind);
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down cell orchestrator");
    cell.shutdown().await?;

    Ok(())
}
