use anyhow::Result;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use device_bridge::channel::CommandServer;
use device_bridge::commands::{build_registry, CommandContext};
use device_bridge::transport::SimulatedTransport;
use device_bridge::utils::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    info!("🚀 Starting device-bridge daemon");

    // Dev builds run against the simulated transport; a platform HID backend
    // plugs in behind the same trait.
    let transport = Arc::new(SimulatedTransport::new());
    let ctx = CommandContext::new(transport, &config);
    let registry = Arc::new(build_registry(ctx)?);

    // Stale socket from a previous run.
    let _ = std::fs::remove_file(&config.socket_path);
    let listener = UnixListener::bind(&config.socket_path)?;
    info!("🚀 Listening on {}", config.socket_path);

    CommandServer::new(registry).serve(listener).await?;
    Ok(())
}
