pub mod fix;
pub mod location;
pub mod session;

pub use fix::LocationFix;
pub use location::{LocationKind, LocationPayload, QueuedLocation, WIRE_TIMESTAMP_FORMAT};
pub use session::{SessionEvent, TrackingSession};
