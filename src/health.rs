use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::TrackingConfig;
use crate::platform::{Accuracy, LocationService};
use crate::store::Store;

/// Detects a location service that is enabled but not producing fixes.
///
/// The `blocked` flag is advisory: hosts show a modal while it is `true`,
/// tracking itself keeps going.
pub struct GpsHealthMonitor {
    location: Arc<dyn LocationService>,
    probe_timeout: Duration,
    poll_interval: Duration,
    blocked: watch::Sender<bool>,
}

impl GpsHealthMonitor {
    pub fn new(location: Arc<dyn LocationService>, config: &TrackingConfig) -> Self {
        let (blocked, _) = watch::channel(false);
        Self {
            location,
            probe_timeout: config.health_probe_timeout,
            poll_interval: config.health_poll_interval,
            blocked,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.blocked.subscribe()
    }

    pub fn is_blocked(&self) -> bool {
        *self.blocked.borrow()
    }

    /// Runs one liveness probe and publishes the result. Returns `true` when
    /// the service produced a fix.
    pub async fn probe(&self) -> bool {
        let healthy = self.check().await;
        let changed = self.blocked.send_if_modified(|blocked| {
            let was = *blocked;
            *blocked = !healthy;
            was != *blocked
        });
        if changed {
            if healthy {
                info!("Location service recovered");
            } else {
                warn!("Location service is not producing fixes");
            }
        }
        healthy
    }

    pub async fn on_app_foreground(&self) -> bool {
        self.probe().await
    }

    /// Startup probe, only when a persisted session is already active.
    pub async fn on_startup(&self, session_active: bool) -> Option<bool> {
        if !session_active {
            return None;
        }
        Some(self.probe().await)
    }

    /// Polls every `poll_interval`, probing only while the stored session is
    /// active.
    pub fn spawn_polling(self: Arc<Self>, store: Arc<dyn Store>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.poll_interval.as_secs(),
                "GPS health polling started"
            );
            loop {
                tokio::time::sleep(self.poll_interval).await;

                match store.load_session().await {
                    Ok(Some(session)) if session.is_active => {
                        self.probe().await;
                    }
                    Ok(_) => debug!("No active session, skipping GPS probe"),
                    Err(e) => error!("Failed to load session for GPS probe: {}", e),
                }
            }
        })
    }

    async fn check(&self) -> bool {
        if !self.location.services_enabled().await {
            debug!("Location services disabled");
            return false;
        }
        match timeout(self.probe_timeout, self.location.current_position(Accuracy::Low)).await {
            Ok(Ok(fix)) => fix.has_valid_coordinates(),
            Ok(Err(e)) => {
                debug!("GPS probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!(
                    timeout_secs = self.probe_timeout.as_secs(),
                    "GPS probe timed out"
                );
                false
            }
        }
    }
}
