//! Background location tracking for field workers.
//!
//! Fixes from the device flow through a movement classifier into a durable
//! queue that is flushed to the location API. A login session gates the
//! whole pipeline.

pub mod classifier;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod health;
pub mod models;
pub mod platform;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod sampler;
pub mod session;
pub mod store;
pub mod uplink;

#[cfg(test)]
mod testing;

pub use classifier::{Classification, FixOutcome, MovementClassifier};
pub use config::{AppConfig, TrackingConfig};
pub use error::{LocationError, StoreError, TrackingError};
pub use health::GpsHealthMonitor;
pub use models::{LocationFix, LocationKind, QueuedLocation, SessionEvent, TrackingSession};
pub use processor::{handle_background_fixes, FixPipeline};
pub use queue::{DurableQueue, FlushReport};
pub use session::SessionManager;
pub use store::Store;
pub use uplink::{HttpUplink, SendOutcome, Uplink};
