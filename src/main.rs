use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};

use field_tracker::clock::SystemClock;
use field_tracker::db::{self, SqliteStore};
use field_tracker::platform::replay::ReplayLocationService;
use field_tracker::{retry, AppConfig, GpsHealthMonitor, HttpUplink, SessionEvent, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Field Tracker...");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));
    info!("Opened location store at {}", config.database_url);

    // Uplink and location source
    let uplink = Arc::new(HttpUplink::new(
        config.location_url(),
        config.tracking.uplink_timeout,
    )?);
    let replay_file = config
        .replay_file
        .as_deref()
        .context("REPLAY_FILE must point to a recorded track")?;
    let location = Arc::new(ReplayLocationService::from_file(replay_file, config.replay_pace).await?);
    if location.is_empty() {
        warn!("Replay track {} has no usable fixes", replay_file);
    }

    let health = Arc::new(GpsHealthMonitor::new(location.clone(), &config.tracking));
    let manager = SessionManager::new(
        store.clone(),
        uplink,
        location.clone(),
        Arc::new(SystemClock),
        config.tracking.clone(),
    )
    .with_health_monitor(health.clone());

    // Resume a persisted session or start a new one
    if manager.restore().await? {
        health.on_startup(true).await;
    } else {
        manager
            .start_tracking(&config.auth_token, SessionEvent::Login)
            .await?;
    }
    info!(
        "Tracking session {}",
        manager.session_id().await?.unwrap_or_default()
    );

    // Background work
    let retry_loop = retry::spawn_retry_loop(manager.pipeline(), &config.tracking);
    let health_poll = health.clone().spawn_polling(store);

    tokio::select! {
        _ = location.finished() => info!("Replay finished"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    retry_loop.abort();
    health_poll.abort();

    let report = manager.flush().await?;
    info!(
        "Final flush: {} sent, {} pending",
        report.sent,
        manager.queue().len().await?
    );

    Ok(())
}
