use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fix::LocationFix;
use super::location::LocationKind;

/// Persisted state of the single tracking session a device may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    pub session_id: String,
    /// Bearer token re-read by background callbacks on every invocation.
    pub token: String,
    /// Tracking-enabled flag. A stopped session still exists until logout.
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_fix: Option<LocationFix>,
    #[serde(default)]
    pub auth_expired: bool,
}

impl TrackingSession {
    pub fn start(token: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            token: token.into(),
            is_active: true,
            started_at: now,
            last_fix: None,
            auth_expired: false,
        }
    }
}

/// Lifecycle events the host application reports through `start_tracking`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Login,
    Logout,
    FormStart { form_id: i64, notes: String },
    FormEnd { form_id: i64, notes: String },
}

impl SessionEvent {
    pub fn kind(&self) -> LocationKind {
        match self {
            SessionEvent::Login => LocationKind::Login,
            SessionEvent::Logout => LocationKind::Logout,
            SessionEvent::FormStart { .. } => LocationKind::FormStart,
            SessionEvent::FormEnd { .. } => LocationKind::FormEnd,
        }
    }

    pub fn form(&self) -> Option<(i64, &str)> {
        match self {
            SessionEvent::FormStart { form_id, notes } | SessionEvent::FormEnd { form_id, notes } => {
                Some((*form_id, notes.as_str()))
            }
            _ => None,
        }
    }
}
