/// GoalLeader server - Main entry point
use goalleader_core::{http_api, Config};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config =
        Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("🚀 Starting GoalLeader server");
    info!("   Environment: {}", config.environment);
    match &config.data_dir {
        Some(dir) => info!("   Data dir: {}", dir.display()),
        None => info!("   Data dir: none (in-memory store)"),
    }

    // Serve until shutdown
    tokio::select! {
        result = http_api::start_http_api(config) => {
            result.map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
