//! task-supervisor - HTTP Server Entry Point
//!
//! Loads configuration, arms the daily check triggers and serves the control API.

use task_supervisor::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_supervisor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, utc_offset={}, outage_policy={:?}, enforcement_enabled={}",
        config.vision_model,
        config.timezone,
        config.outage_policy,
        config.enforcement.enabled
    );
    info!(
        "Check times: morning={}, evening={}",
        config.morning_schedule, config.evening_schedule
    );

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
