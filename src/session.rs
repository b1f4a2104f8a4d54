//! Session lifecycle and the public tracking API.
//!
//! `SessionManager` is the service object hosts construct with their
//! storage, network client, clock and location platform. It gates the
//! whole pipeline: without a stored session no fix is ever queued.

use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::TrackingConfig;
use crate::error::{StoreError, TrackingError};
use crate::health::GpsHealthMonitor;
use crate::models::{LocationFix, LocationKind, QueuedLocation, SessionEvent, TrackingSession};
use crate::platform::{Accuracy, LocationService};
use crate::processor::FixPipeline;
use crate::queue::{DurableQueue, FlushReport};
use crate::sampler::{within_accuracy, FixCallback, GeoSampler};
use crate::store::Store;
use crate::uplink::Uplink;

pub struct SessionManager {
    store: Arc<dyn Store>,
    pipeline: Arc<FixPipeline>,
    sampler: GeoSampler,
    location: Arc<dyn LocationService>,
    clock: Arc<dyn Clock>,
    config: TrackingConfig,
    health: Option<Arc<GpsHealthMonitor>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        uplink: Arc<dyn Uplink>,
        location: Arc<dyn LocationService>,
        clock: Arc<dyn Clock>,
        config: TrackingConfig,
    ) -> Self {
        let pipeline = Arc::new(FixPipeline::new(store.clone(), uplink, &config));
        let sampler = GeoSampler::new(location.clone(), config.clone());
        Self {
            store,
            pipeline,
            sampler,
            location,
            clock,
            config,
            health: None,
        }
    }

    /// Probes GPS health on foreground transitions while tracking.
    pub fn with_health_monitor(mut self, monitor: Arc<GpsHealthMonitor>) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn pipeline(&self) -> Arc<FixPipeline> {
        self.pipeline.clone()
    }

    pub fn queue(&self) -> Arc<DurableQueue> {
        self.pipeline.queue()
    }

    /// Flips to `true` when the server rejects the session token.
    pub fn subscribe_auth_expired(&self) -> watch::Receiver<bool> {
        self.pipeline.subscribe_auth_expired()
    }

    /// Reports a lifecycle event. `Login` always starts a new session; every
    /// other event needs an existing one and is ignored otherwise.
    pub async fn start_tracking(&self, token: &str, event: SessionEvent) -> Result<(), TrackingError> {
        match event {
            SessionEvent::Login => self.login(token).await,
            SessionEvent::Logout => self.logout(token).await,
            other => self.record_event(token, other).await,
        }
    }

    /// Stops sampling but keeps the session, so a later logout is still
    /// attributed to it.
    pub async fn stop_tracking(&self) -> Result<(), TrackingError> {
        self.sampler.stop().await;
        let updated = self
            .store
            .update_session(Box::new(|session: &mut TrackingSession| {
                session.is_active = false;
            }))
            .await?;
        match updated {
            Some(session) => info!(session_id = %session.session_id, "Tracking stopped"),
            None => debug!("Tracking stop requested without a session"),
        }
        Ok(())
    }

    pub async fn is_tracking_active(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .load_session()
            .await?
            .is_some_and(|session| session.is_active))
    }

    pub async fn session_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .load_session()
            .await?
            .map(|session| session.session_id))
    }

    /// Restart path: resumes sampling for a persisted active session.
    /// Returns whether tracking was resumed.
    pub async fn restore(&self) -> Result<bool, TrackingError> {
        let Some(session) = self.store.load_session().await? else {
            debug!("No persisted session to restore");
            return Ok(false);
        };
        if !session.is_active {
            info!(session_id = %session.session_id, "Persisted session is stopped, not resuming");
            return Ok(false);
        }

        self.start_sampling().await;
        info!(session_id = %session.session_id, "Tracking session restored");

        if let Err(e) = self.pipeline.flush().await {
            error!("Flush after restore failed: {}", e);
        }
        Ok(true)
    }

    /// Called when the app returns to the foreground.
    pub async fn on_app_foreground(&self) -> Result<FlushReport, StoreError> {
        debug!("App foregrounded, flushing location queue");
        if let Some(health) = &self.health {
            if self.is_tracking_active().await? {
                health.on_app_foreground().await;
            }
        }
        self.pipeline.flush().await
    }

    pub async fn flush(&self) -> Result<FlushReport, StoreError> {
        self.pipeline.flush().await
    }

    async fn login(&self, token: &str) -> Result<(), TrackingError> {
        // 1. Permissions gate everything
        self.sampler.request_permissions().await?;

        // 2. Any previous session is superseded
        self.sampler.stop().await;

        // 3. New session with the best position we can get right now
        let fix = self.best_fix(None).await;
        let mut session = TrackingSession::start(token, self.clock.now());
        session.last_fix = fix.clone();
        let login_item = fix.map(|fix| QueuedLocation::new(fix, LocationKind::Login, &session.session_id));
        if login_item.is_none() {
            warn!(session_id = %session.session_id, "No position available, login recorded without a location");
        }

        self.store
            .replace_session(&session, login_item.as_ref())
            .await?;
        self.pipeline.clear_auth_expired();
        info!(session_id = %session.session_id, "Tracking session started");

        // 4. Start sampling, then push the login location out
        self.start_sampling().await;
        self.pipeline.flush().await?;
        Ok(())
    }

    async fn logout(&self, token: &str) -> Result<(), TrackingError> {
        let Some(session) = self.store.load_session().await? else {
            warn!("Logout without an active session, ignoring");
            return Ok(());
        };

        // 1. No fix may arrive after the session is torn down
        self.sampler.stop().await;

        // 2. Final location, sent with the freshest token we have
        let token = token.to_string();
        self.store
            .update_session(Box::new(move |session: &mut TrackingSession| {
                if !token.is_empty() {
                    session.token = token;
                    session.auth_expired = false;
                }
                session.is_active = false;
            }))
            .await?;
        self.pipeline.clear_auth_expired();

        match self.best_fix(session.last_fix.clone()).await {
            Some(fix) => {
                let item = QueuedLocation::new(fix, LocationKind::Logout, &session.session_id);
                self.pipeline.queue().enqueue(&item).await?;
            }
            None => warn!(session_id = %session.session_id, "No position available for logout"),
        }

        // 3. Give pending items a bounded chance before the queue is dropped
        self.drain_queue().await?;

        // 4. Clear everything
        let dropped = self.pipeline.queue().len().await?;
        if dropped > 0 {
            warn!(
                session_id = %session.session_id,
                dropped, "Discarding unsent locations at logout"
            );
        }
        self.store.clear_all().await?;
        info!(session_id = %session.session_id, "Tracking session ended");
        Ok(())
    }

    async fn record_event(&self, token: &str, event: SessionEvent) -> Result<(), TrackingError> {
        let Some(session) = self.store.load_session().await? else {
            warn!(kind = %event.kind(), "No active session, ignoring event");
            return Ok(());
        };

        if !token.is_empty() && token != session.token {
            let token = token.to_string();
            self.store
                .update_session(Box::new(move |session: &mut TrackingSession| {
                    session.token = token;
                    session.auth_expired = false;
                }))
                .await?;
            self.pipeline.clear_auth_expired();
        }

        let Some(fix) = self.best_fix(session.last_fix.clone()).await else {
            warn!(kind = %event.kind(), "No position available, event not recorded");
            return Ok(());
        };

        let mut item = QueuedLocation::new(fix, event.kind(), &session.session_id);
        if let Some((form_id, notes)) = event.form() {
            item = item.with_form(form_id, notes);
        }
        self.pipeline.queue().enqueue(&item).await?;
        info!(kind = %item.kind, session_id = %item.session_id, "Session event queued");

        self.pipeline.flush().await?;
        Ok(())
    }

    /// Each attempt waits for a flush already in flight, whose snapshot
    /// predates the logout item, before sending.
    async fn drain_queue(&self) -> Result<(), StoreError> {
        let attempts = self.config.logout_flush_attempts.max(1);
        let wait = self.config.uplink_timeout + self.config.logout_flush_delay;
        for attempt in 1..=attempts {
            let report = self.pipeline.flush_waiting(wait).await?;
            if self.pipeline.queue().is_empty().await? || report.unauthorized {
                return Ok(());
            }
            debug!(
                attempt,
                failed = report.failed,
                skipped = report.skipped,
                "Logout flush incomplete"
            );
            if attempt < attempts {
                tokio::time::sleep(self.config.logout_flush_delay).await;
            }
        }
        Ok(())
    }

    async fn start_sampling(&self) {
        let pipeline = self.pipeline.clone();
        let on_fix: FixCallback = Arc::new(move |fix| {
            let pipeline = pipeline.clone();
            async move {
                if let Err(e) = pipeline.process_fix(fix).await {
                    error!("Error processing fix: {}", e);
                }
            }
            .boxed()
        });

        if let Err(e) = self.sampler.start_foreground(on_fix).await {
            error!("Failed to start foreground location watch: {}", e);
        }
        if let Err(e) = self
            .sampler
            .ensure_background(&self.config.background_task_id)
            .await
        {
            error!("Failed to register background location task: {}", e);
        }
    }

    /// Fresh fix bounded by `fix_timeout`, else the platform's last known
    /// position, else `fallback`.
    async fn best_fix(&self, fallback: Option<LocationFix>) -> Option<LocationFix> {
        match timeout(
            self.config.fix_timeout,
            self.location.current_position(Accuracy::High),
        )
        .await
        {
            Ok(Ok(fix)) if within_accuracy(&fix, self.config.max_accuracy_m) => return Some(fix),
            Ok(Ok(fix)) => debug!(accuracy = fix.accuracy, "Current fix too inaccurate"),
            Ok(Err(e)) => debug!("Current position unavailable: {}", e),
            Err(_) => debug!("Timed out waiting for current position"),
        }

        match self.location.last_known_position().await {
            Ok(Some(fix)) if within_accuracy(&fix, self.config.max_accuracy_m) => return Some(fix),
            Ok(Some(fix)) => debug!(accuracy = fix.accuracy, "Last known fix unusable"),
            Ok(None) => {}
            Err(e) => debug!("Last known position unavailable: {}", e),
        }

        fallback
    }
}
