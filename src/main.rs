//! API gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                       API GATEWAY                         │
//!                     │                                                           │
//!   Client Request    │  ┌──────────┐   ┌────────────┐   ┌──────┐   ┌──────────┐  │
//!   ──────────────────┼─▶│request-id│──▶│ rate limit │──▶│ auth │──▶│ dispatch │  │
//!                     │  │ + trace  │   │ (per IP)   │   │(JWT) │   └────┬─────┘  │
//!                     │  └──────────┘   └────────────┘   └──────┘        │        │
//!                     │       │                               /health ◀──┤        │
//!                     │       └──▶ /metrics                              ▼        │
//!                     │                                          ┌────────────┐   │
//!   Client Response   │                                          │   proxy    │───┼──▶ Backend
//!   ◀─────────────────┼──────────────────────────────────────────│ (timeout,  │◀──┼─── Services
//!                     │                                          │  classify) │   │
//!                     │                                          └────────────┘   │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::load_config;
use api_gateway::lifecycle::wait_for_signal;
use api_gateway::observability::logging::init_logging;
use api_gateway::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "api-gateway", version, about = "Rate-limited, authenticating reverse proxy")]
struct Cli {
    /// Path to a TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "API_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        routes = config.effective_routes().len(),
        requests_per_window = config.rate_limit.requests_per_window,
        window_secs = config.rate_limit.window_secs,
        proxy_timeout_secs = config.timeouts.proxy_secs,
        "Configuration loaded"
    );

    // Bind TCP listener
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let drain = Duration::from_secs(config.timeouts.shutdown_secs);
    let server = HttpServer::new(config)?;
    server.run(listener, wait_for_signal(), drain).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
