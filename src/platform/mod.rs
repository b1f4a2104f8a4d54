//! Seam to the device location service.
//!
//! Mobile hosts implement [`LocationService`] over the OS primitives; the
//! bundled [`replay::ReplayLocationService`] feeds recorded fixes instead.

pub mod replay;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::LocationError;
use crate::models::LocationFix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Low,
    Balanced,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Cadence requested from the platform for a watch or background task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub accuracy: Accuracy,
    pub time_interval: Duration,
    pub distance_interval_m: f64,
}

#[async_trait]
pub trait LocationService: Send + Sync {
    /// Prompts for foreground and background location access.
    async fn request_permissions(&self) -> Result<PermissionStatus, LocationError>;

    async fn services_enabled(&self) -> bool;

    /// May wait indefinitely; callers bound it with a timeout.
    async fn current_position(&self, accuracy: Accuracy) -> Result<LocationFix, LocationError>;

    async fn last_known_position(&self) -> Result<Option<LocationFix>, LocationError>;

    /// Starts a continuous watch. Dropping the receiver cancels it.
    async fn watch_position(
        &self,
        options: SamplingOptions,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError>;

    /// Registers a background task. The platform delivers its fixes to
    /// `processor::handle_background_fixes`, never to live in-memory state.
    async fn start_background_updates(
        &self,
        task_id: &str,
        options: SamplingOptions,
    ) -> Result<(), LocationError>;

    async fn stop_background_updates(&self, task_id: &str) -> Result<(), LocationError>;

    async fn has_started_background_updates(&self, task_id: &str) -> bool;
}
