//! Fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::LocationError;
use crate::geo::EARTH_RADIUS_M;
use crate::models::{LocationFix, QueuedLocation};
use crate::platform::{Accuracy, LocationService, PermissionStatus, SamplingOptions};
use crate::uplink::{SendOutcome, Uplink};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub fn fix_at(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> LocationFix {
    LocationFix::new(latitude, longitude, 8.0, captured_at)
}

/// A fix `meters` due north of `from`, captured `after` later.
pub fn north_of(from: &LocationFix, meters: f64, after: ChronoDuration) -> LocationFix {
    let degrees = (meters / EARTH_RADIUS_M).to_degrees();
    fix_at(from.latitude + degrees, from.longitude, from.captured_at + after)
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Uplink that answers from a script keyed by latitude and records every
/// attempt.
pub struct ScriptedUplink {
    default: Mutex<SendOutcome>,
    overrides: Mutex<Vec<(f64, SendOutcome)>>,
    attempts: Mutex<Vec<(QueuedLocation, String)>>,
    delay: Duration,
}

impl ScriptedUplink {
    pub fn new(default: SendOutcome) -> Self {
        Self {
            default: Mutex::new(default),
            overrides: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every send takes `delay` before answering, like a slow network.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn accepting() -> Self {
        Self::new(SendOutcome::Sent)
    }

    pub fn failing() -> Self {
        Self::new(SendOutcome::Retry)
    }

    pub fn set_default(&self, outcome: SendOutcome) {
        *self.default.lock().unwrap() = outcome;
    }

    pub fn respond_for_latitude(&self, latitude: f64, outcome: SendOutcome) {
        self.overrides.lock().unwrap().push((latitude, outcome));
    }

    pub fn attempts(&self) -> Vec<QueuedLocation> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(item, _)| item.clone())
            .collect()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }

    /// Items the scripted server accepted.
    pub fn delivered(&self) -> Vec<QueuedLocation> {
        self.attempts()
            .into_iter()
            .filter(|item| self.outcome_for(item) == SendOutcome::Sent)
            .collect()
    }

    fn outcome_for(&self, item: &QueuedLocation) -> SendOutcome {
        self.overrides
            .lock()
            .unwrap()
            .iter()
            .find(|(lat, _)| (lat - item.fix.latitude).abs() < 1e-9)
            .map(|(_, outcome)| *outcome)
            .unwrap_or(*self.default.lock().unwrap())
    }
}

#[async_trait]
impl Uplink for ScriptedUplink {
    async fn send(&self, item: &QueuedLocation, token: &str) -> SendOutcome {
        self.attempts
            .lock()
            .unwrap()
            .push((item.clone(), token.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome_for(item)
    }
}

/// In-memory location platform driven by the test.
pub struct FakeLocation {
    pub permission: Mutex<PermissionStatus>,
    pub enabled: AtomicBool,
    /// `None` makes `current_position` hang until the caller times out.
    pub current: Mutex<Option<LocationFix>>,
    pub last_known: Mutex<Option<LocationFix>>,
    pub permission_requests: AtomicUsize,
    watcher: Mutex<Option<mpsc::Sender<LocationFix>>>,
    background: Mutex<HashSet<String>>,
}

impl FakeLocation {
    pub fn new(current: Option<LocationFix>) -> Self {
        Self {
            permission: Mutex::new(PermissionStatus::Granted),
            enabled: AtomicBool::new(true),
            current: Mutex::new(current),
            last_known: Mutex::new(None),
            permission_requests: AtomicUsize::new(0),
            watcher: Mutex::new(None),
            background: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_current(&self, fix: Option<LocationFix>) {
        *self.current.lock().unwrap() = fix;
    }

    pub fn deny_permission(&self) {
        *self.permission.lock().unwrap() = PermissionStatus::Denied;
    }

    /// Pushes a fix to the active watch. Returns false when nobody watches.
    pub async fn emit(&self, fix: LocationFix) -> bool {
        let sender = self.watcher.lock().unwrap().clone();
        match sender {
            Some(tx) => tx.send(fix).await.is_ok(),
            None => false,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn background_tasks(&self) -> HashSet<String> {
        self.background.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocationService for FakeLocation {
    async fn request_permissions(&self) -> Result<PermissionStatus, LocationError> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        Ok(*self.permission.lock().unwrap())
    }

    async fn services_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<LocationFix, LocationError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(LocationError::ServicesDisabled);
        }
        let current = self.current.lock().unwrap().clone();
        match current {
            Some(fix) => Ok(fix),
            None => std::future::pending().await,
        }
    }

    async fn last_known_position(&self) -> Result<Option<LocationFix>, LocationError> {
        Ok(self.last_known.lock().unwrap().clone())
    }

    async fn watch_position(
        &self,
        _options: SamplingOptions,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
        let (tx, rx) = mpsc::channel(16);
        *self.watcher.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn start_background_updates(
        &self,
        task_id: &str,
        _options: SamplingOptions,
    ) -> Result<(), LocationError> {
        self.background.lock().unwrap().insert(task_id.to_string());
        Ok(())
    }

    async fn stop_background_updates(&self, task_id: &str) -> Result<(), LocationError> {
        self.background.lock().unwrap().remove(task_id);
        Ok(())
    }

    async fn has_started_background_updates(&self, task_id: &str) -> bool {
        self.background.lock().unwrap().contains(task_id)
    }
}
