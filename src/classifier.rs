use std::time::Duration;

use crate::config::TrackingConfig;
use crate::models::{LocationFix, LocationKind, QueuedLocation, TrackingSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No previous fix in this session.
    First,
    Moving,
    /// Stationary, but the still interval elapsed.
    Heartbeat,
    /// Too close or too soon since the last accepted fix.
    Dwell,
    /// Captured before the last accepted fix.
    Stale,
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Classification::First | Classification::Moving | Classification::Heartbeat
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    Queued(QueuedLocation, Classification),
    Rejected(Classification),
    /// Over the accuracy ceiling or with invalid coordinates.
    Inaccurate,
    NoSession,
}

/// Two-speed sampling policy: fast while moving, a slow heartbeat while
/// still.
#[derive(Debug, Clone)]
pub struct MovementClassifier {
    min_distance_m: f64,
    move_interval: Duration,
    still_interval: Duration,
}

impl MovementClassifier {
    pub fn new(min_distance_m: f64, move_interval: Duration, still_interval: Duration) -> Self {
        Self {
            min_distance_m,
            move_interval,
            still_interval,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(
            config.min_distance_m,
            config.move_interval,
            config.still_interval,
        )
    }

    pub fn classify(&self, fix: &LocationFix, last: Option<&LocationFix>) -> Classification {
        let Some(last) = last else {
            return Classification::First;
        };

        let Ok(elapsed) = (fix.captured_at - last.captured_at).to_std() else {
            return Classification::Stale;
        };
        let distance = fix.distance_to(last);

        if distance >= self.min_distance_m && elapsed >= self.move_interval {
            Classification::Moving
        } else if elapsed >= self.still_interval {
            Classification::Heartbeat
        } else {
            Classification::Dwell
        }
    }

    /// Classifies `fix` against the session and, when accepted, records it
    /// as the session's last fix and builds the `tracking` item.
    pub fn apply(&self, session: &mut TrackingSession, fix: &LocationFix) -> FixOutcome {
        let classification = self.classify(fix, session.last_fix.as_ref());
        if !classification.is_accepted() {
            return FixOutcome::Rejected(classification);
        }

        session.last_fix = Some(fix.clone());
        let item = QueuedLocation::new(fix.clone(), LocationKind::Tracking, &session.session_id);
        FixOutcome::Queued(item, classification)
    }
}
