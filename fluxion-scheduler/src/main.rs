//! Fluxion Scheduler
//!
//! Serves the HTTP API and consumes the job queue in the same process.

use anyhow::{Context, Result};
use fluxion_scheduler::{Config, Engine, api};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "fluxion_scheduler=debug,fluxion::script=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Fluxion Scheduler...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let engine = Engine::connect(&config)
        .await
        .context("Failed to start engine")?;

    // Queue consumer
    let poller = engine.poller();
    tokio::spawn(async move { poller.run().await });

    // Build router with all API endpoints
    let app = api::create_router(engine);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
