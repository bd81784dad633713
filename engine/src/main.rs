use anyhow::Result;
use ledger_engine::backend::config::EngineConfig;
use ledger_engine::backend::{build_scheduler, initialize_backend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = EngineConfig::config_path();
    let config = EngineConfig::load_or_create(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting ledger engine with config {:?}", config_path);
    let state = initialize_backend(&config).await?;
    let scheduler = build_scheduler(&state, &config);

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    info!("Ledger engine stopped");
    Ok(())
}
