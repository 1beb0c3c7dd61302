//! # Shortwave Server
//!
//! Realtime click feed server for shortened links.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! shortwave
//!
//! # Run with environment variables
//! SHORTWAVE_PORT=8080 SHORTWAVE_HOST=0.0.0.0 shortwave
//! ```
//!
//! Settings can also come from `shortwave.toml` in the working directory,
//! `/etc/shortwave/`, or `~/.config/shortwave/`.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shortwave=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = shortwave_server::Config::load()?;

    tracing::info!("Starting shortwave server on {}:{}", config.host, config.port);

    // Initialize metrics
    shortwave_server::metrics::init_metrics();

    // Start the server
    shortwave_server::run_server(config).await?;

    Ok(())
}
