//! # Gateway
//!
//! Realtime WebSocket fan-out gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! gateway
//!
//! # Run with a config file in the working directory
//! cp gateway.example.toml gateway.toml && gateway
//!
//! # Run with environment variables
//! GATEWAY_PORT=8080 GATEWAY_HOST=0.0.0.0 GATEWAY__HUB__ECHO=include_sender gateway
//! ```

use anyhow::Result;
use gateway_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting gateway on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
