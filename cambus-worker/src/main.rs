use anyhow::Context;
use cambus_store::app_config::Config;
use cambus_worker::{start_event_logger, start_expiry_worker, AppState};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cambus_worker=debug,cambus_order=debug,cambus_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Cambus reservation worker");

    let state = AppState::build(config).await?;
    state
        .manager
        .rehydrate()
        .await
        .context("Failed to rebuild the seat ledger")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = start_expiry_worker(
        state.sweeper.clone(),
        state.business_rules.sweep_interval(),
        shutdown_rx.clone(),
    );
    let logger = start_event_logger(state.context.subscribe(), shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    // Receivers may already be gone
    let _ = shutdown_tx.send(true);
    sweeper.await?;
    let logged = logger.await?;
    tracing::info!("Worker stopped, {} booking events logged", logged);

    Ok(())
}
