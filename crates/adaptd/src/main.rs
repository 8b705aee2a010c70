//! Adaptation daemon - the Managing System side of the control loop.
//!
//! Ingests telemetry from managed ML pipelines, analyzes it against
//! registered policies, and dispatches corrective tactics.

use adaptd::config::Config;
use adaptd::server::{self, AppState};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("adaptd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    let state = AppState::from_config(&config).await?;

    server::run(config, state).await
}
