//! Radix Gateway
//!
//! Usage: `radix-gateway [config.toml]`. Without an argument the path in
//! `GATEWAY_CONFIG` is used; without either, built-in defaults.

use std::path::PathBuf;

use tokio::net::TcpListener;

use radix_gateway::config::{load_config, GatewayConfig};
use radix_gateway::lifecycle::{shutdown_signal, Shutdown};
use radix_gateway::observability::{logging, metrics};
use radix_gateway::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("radix-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config = ?config_path,
        bind_address = %config.server.bind_address,
        routes = config.routes.len(),
        route_rules = config.route_rules.len(),
        request_timeout_secs = config.server.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config.clone())?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
