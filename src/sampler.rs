use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TrackingConfig;
use crate::error::{LocationError, TrackingError};
use crate::models::LocationFix;
use crate::platform::{LocationService, PermissionStatus};

pub type FixCallback = Arc<dyn Fn(LocationFix) -> BoxFuture<'static, ()> + Send + Sync>;

/// Drops fixes that are noise rather than movement signal.
pub fn within_accuracy(fix: &LocationFix, max_accuracy_m: f64) -> bool {
    fix.is_well_formed() && fix.accuracy <= max_accuracy_m
}

/// Produces fixes from the platform, in the foreground through a watch and
/// in the background through a registered platform task.
pub struct GeoSampler {
    location: Arc<dyn LocationService>,
    config: TrackingConfig,
    watch: Mutex<Option<JoinHandle<()>>>,
    background_task: Mutex<Option<String>>,
    permission_prompted: AtomicBool,
}

impl GeoSampler {
    pub fn new(location: Arc<dyn LocationService>, config: TrackingConfig) -> Self {
        Self {
            location,
            config,
            watch: Mutex::new(None),
            background_task: Mutex::new(None),
            permission_prompted: AtomicBool::new(false),
        }
    }

    /// Asks for location access. The user-facing prompt is surfaced once per
    /// sampler; a denial afterwards is only logged.
    pub async fn request_permissions(&self) -> Result<(), TrackingError> {
        let status = self.location.request_permissions().await?;
        if status == PermissionStatus::Granted {
            return Ok(());
        }

        if !self.permission_prompted.swap(true, Ordering::SeqCst) {
            warn!("Location permission denied; enable it in system settings to start tracking");
        } else {
            debug!("Location permission still denied");
        }
        Err(TrackingError::PermissionDenied)
    }

    pub async fn start_foreground(&self, on_fix: FixCallback) -> Result<(), LocationError> {
        let mut rx = self.location.watch_position(self.config.foreground).await?;
        let max_accuracy_m = self.config.max_accuracy_m;

        let handle = tokio::spawn(async move {
            while let Some(fix) = rx.recv().await {
                if !within_accuracy(&fix, max_accuracy_m) {
                    debug!(accuracy = fix.accuracy, "Dropping inaccurate fix");
                    continue;
                }
                on_fix(fix).await;
            }
            debug!("Foreground watch ended");
        });

        if let Some(previous) = self.replace_watch(Some(handle)) {
            previous.abort();
        }
        info!(
            interval_secs = self.config.foreground.time_interval.as_secs(),
            distance_m = self.config.foreground.distance_interval_m,
            "Foreground location watch started"
        );
        Ok(())
    }

    pub async fn start_background(&self, task_id: &str) -> Result<(), LocationError> {
        self.location
            .start_background_updates(task_id, self.config.background)
            .await?;
        self.set_background_task(Some(task_id.to_string()));
        info!(task_id, "Background location task registered");
        Ok(())
    }

    /// Registers the background task again if the platform lost it.
    pub async fn ensure_background(&self, task_id: &str) -> Result<(), LocationError> {
        if self.location.has_started_background_updates(task_id).await {
            self.set_background_task(Some(task_id.to_string()));
            return Ok(());
        }
        self.start_background(task_id).await
    }

    /// Cancels the foreground watch and unregisters the background task.
    /// Safe to call when nothing is running.
    pub async fn stop(&self) {
        if let Some(handle) = self.replace_watch(None) {
            handle.abort();
            debug!("Foreground location watch cancelled");
        }

        let task_id = self
            .take_background_task()
            .unwrap_or_else(|| self.config.background_task_id.clone());
        if !self.location.has_started_background_updates(&task_id).await {
            return;
        }
        match self.location.stop_background_updates(&task_id).await {
            Ok(()) => info!(task_id = %task_id, "Background location task unregistered"),
            Err(e) => error!("Failed to unregister background task {}: {}", task_id, e),
        }
    }

    pub fn is_running(&self) -> bool {
        let watching = self
            .watch
            .lock()
            .map(|w| w.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false);
        let background = self
            .background_task
            .lock()
            .map(|t| t.is_some())
            .unwrap_or(false);
        watching || background
    }

    fn replace_watch(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.watch.lock() {
            Ok(mut watch) => std::mem::replace(&mut *watch, handle),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), handle),
        }
    }

    fn set_background_task(&self, task_id: Option<String>) {
        match self.background_task.lock() {
            Ok(mut task) => *task = task_id,
            Err(poisoned) => *poisoned.into_inner() = task_id,
        }
    }

    fn take_background_task(&self) -> Option<String> {
        match self.background_task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{base_time, fix_at, FakeLocation};
    use futures::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn collecting_callback() -> (FixCallback, mpsc::UnboundedReceiver<LocationFix>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: FixCallback = Arc::new(move |fix| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(fix);
            }
            .boxed()
        });
        (callback, rx)
    }

    #[test]
    fn test_accuracy_ceiling() {
        let mut fix = fix_at(4.6, -74.0, base_time());
        fix.accuracy = 299.0;
        assert!(within_accuracy(&fix, 300.0));
        fix.accuracy = 450.0;
        assert!(!within_accuracy(&fix, 300.0));
        fix.accuracy = f64::NAN;
        assert!(!within_accuracy(&fix, 300.0));
    }

    #[tokio::test]
    async fn test_foreground_watch_filters_noise() {
        let location = Arc::new(FakeLocation::new(None));
        let sampler = GeoSampler::new(location.clone(), TrackingConfig::default());
        let (callback, mut rx) = collecting_callback();
        sampler.start_foreground(callback).await.unwrap();

        let good = fix_at(4.6097, -74.0817, base_time());
        let mut noisy = fix_at(4.7, -74.1, base_time());
        noisy.accuracy = 900.0;
        assert!(location.emit(good.clone()).await);
        assert!(location.emit(noisy).await);

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, good);
        assert!(rx.try_recv().is_err());
        sampler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_both_sources_and_is_idempotent() {
        let location = Arc::new(FakeLocation::new(None));
        let config = TrackingConfig::default();
        let sampler = GeoSampler::new(location.clone(), config.clone());
        let (callback, _rx) = collecting_callback();

        sampler.start_foreground(callback).await.unwrap();
        sampler.start_background(&config.background_task_id).await.unwrap();
        assert!(sampler.is_running());
        assert!(location.background_tasks().contains(&config.background_task_id));

        sampler.stop().await;
        for _ in 0..10 {
            if !location.is_watching() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!sampler.is_running());
        assert!(location.background_tasks().is_empty());
        assert!(!location.is_watching());

        sampler.stop().await;
        assert!(!sampler.is_running());
    }

    #[tokio::test]
    async fn test_stop_unregisters_task_left_by_previous_process() {
        let location = Arc::new(FakeLocation::new(None));
        let config = TrackingConfig::default();
        location
            .start_background_updates(&config.background_task_id, config.background)
            .await
            .unwrap();

        let sampler = GeoSampler::new(location.clone(), config);
        sampler.stop().await;
        assert!(location.background_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let location = Arc::new(FakeLocation::new(None));
        location.deny_permission();
        let sampler = GeoSampler::new(location.clone(), TrackingConfig::default());

        assert!(matches!(
            sampler.request_permissions().await,
            Err(TrackingError::PermissionDenied)
        ));
        assert!(matches!(
            sampler.request_permissions().await,
            Err(TrackingError::PermissionDenied)
        ));
        assert!(sampler.permission_prompted.load(Ordering::SeqCst));
        assert_eq!(location.permission_requests.load(Ordering::SeqCst), 2);
    }
}
