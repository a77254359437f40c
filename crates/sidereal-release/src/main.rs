//! Sidereal release service binary.
//!
//! Runs the health-gated release orchestrator.

use tracing::info;
use tracing_subscriber::EnvFilter;

use sidereal_release::{ReleaseConfig, ReleaseService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sidereal_release=info".parse()?),
        )
        .init();

    info!("Sidereal release service starting");

    // Load configuration
    let config = ReleaseConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ReleaseConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = config.database.url.is_some(),
        executor_configured = config.executor.token.is_some(),
        "configuration loaded"
    );

    ReleaseService::new(config).run().await?;

    Ok(())
}
