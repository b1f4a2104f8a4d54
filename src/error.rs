use std::time::Duration;
use thiserror::Error;

/// Failures of the durable key-value / queue storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Location cannot be stored: {0}")]
    InvalidItem(String),
}

/// Failures reported by the platform location service.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location services are disabled")]
    ServicesDisabled,

    #[error("No position within {0:?}")]
    Timeout(Duration),

    #[error("Location platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Location permission denied, tracking cannot start")]
    PermissionDenied,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Location(#[from] LocationError),
}
