//! pulse-simulator entry point.
//!
//! Runs the synthetic event generator as a standalone server so clients
//! can be exercised without a live backend.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use pulse_gateway::config::SimulatorConfig;
use pulse_gateway::simulator::SyntheticEventGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SimulatorConfig::from_env().context("invalid SIM_LISTEN_ADDR")?;
    let generator = SyntheticEventGenerator::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(
        url = %generator.endpoint_url(""),
        random_traffic = config.random_traffic,
        "simulator ready"
    );

    if config.random_traffic {
        generator.start_random_traffic(config.traffic);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    generator.shutdown().await;

    Ok(())
}
