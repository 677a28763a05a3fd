//! Render ingress gateway.
//!
//! Fronts the asynchronous image-generation pipeline: accepts signed
//! completion callbacks from the serverless execution service and protects
//! the ingress path with rate limits and circuit breakers.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client / Execution service
//!         │
//!         ▼
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │ request id → trace → timeout → body limit                    │
//!  │     → telemetry → rate limit → breaker guard → handler       │
//!  └───────────────┬──────────────────────────────┬───────────────┘
//!                  │                              │
//!                  ▼                              ▼
//!        ┌─────────────────────┐        ┌──────────────────┐
//!        │ callback pipeline   │        │ task cancel      │
//!        │ verify → validate   │        │ → job queue      │
//!        │ → persist → publish │        └──────────────────┘
//!        └─────────────────────┘
//!
//!  Background: backlog monitor, spool flusher, retention sweep, limiter pruner
//! ```
//!
//! Configuration comes from the TOML file named by `RENDER_INGRESS_CONFIG`
//! or the first argument; without one, defaults are used.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use render_ingress::config::{self, GatewayConfig};
use render_ingress::lifecycle::signals::spawn_signal_handler;
use render_ingress::observability::{logging, metrics};
use render_ingress::{Collaborators, HttpServer, Shutdown};

const CONFIG_ENV: &str = "RENDER_INGRESS_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let config: GatewayConfig = match &path {
        Some(path) => config::load_config(path)?,
        None => config::loader::finalize(GatewayConfig::default())?,
    };

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?path,
        mode = ?config.mode,
        "render-ingress starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let collaborators = Collaborators::from_config(&config).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config, collaborators)?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
