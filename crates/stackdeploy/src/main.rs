//! stackdeploy service binary.
//!
//! Accepts deployment requests over HTTP and runs them until shutdown.

use tracing::info;
use tracing_subscriber::EnvFilter;

use stackdeploy::{DeployConfig, DeployService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stackdeploy=info".parse()?))
        .init();

    info!("stackdeploy starting");

    let config = DeployConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        DeployConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        control_plane = %config.control_plane.url,
        workflow = %config.workflow.url,
        token_mode = config.deployment.token_mode.as_str(),
        "configuration loaded"
    );

    DeployService::new(config).run().await?;
    Ok(())
}
