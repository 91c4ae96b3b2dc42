//! Edge gateway binary.
//!
//! ```text
//! edge-gateway [--config gateway.toml]
//! ```
//!
//! Without a config file the defaults apply: no downstream services,
//! event bus disabled, listener on 0.0.0.0:8080.

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use edge_gateway::config::{load_config, GatewayConfig};
use edge_gateway::lifecycle::signals::shutdown_on_signal;
use edge_gateway::observability::{logging, metrics};
use edge_gateway::{Gateway, Shutdown};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "Resilient edge gateway with circuit breaking and event coordination", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        event_bus = config.event_bus.enabled,
        request_timeout_secs = config.timeouts.request_secs,
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let gateway = Gateway::build(config, shutdown)?;
    gateway.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
