use serde::{Deserialize, Serialize};

use super::fix::LocationFix;

/// Timestamp layout expected by the ingestion endpoint (UTC, no `T`/`Z`).
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Login,
    Logout,
    Tracking,
    FormStart,
    FormEnd,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Login => "login",
            LocationKind::Logout => "logout",
            LocationKind::Tracking => "tracking",
            LocationKind::FormStart => "form_start",
            LocationKind::FormEnd => "form_end",
        }
    }

    pub fn is_form(&self) -> bool {
        matches!(self, LocationKind::FormStart | LocationKind::FormEnd)
    }
}

impl std::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fix annotated for transmission. The session id is captured when the
/// item is built and never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedLocation {
    #[serde(flatten)]
    pub fix: LocationFix,
    pub kind: LocationKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl QueuedLocation {
    pub fn new(fix: LocationFix, kind: LocationKind, session_id: impl Into<String>) -> Self {
        Self {
            fix,
            kind,
            session_id: session_id.into(),
            form_id: None,
            notes: None,
        }
    }

    /// Attaches form metadata. Ignored for non-form kinds.
    pub fn with_form(mut self, form_id: i64, notes: impl Into<String>) -> Self {
        if self.kind.is_form() {
            self.form_id = Some(form_id);
            self.notes = Some(notes.into());
        }
        self
    }

    pub fn to_payload(&self) -> LocationPayload<'_> {
        let is_form = self.kind.is_form();
        LocationPayload {
            latitude: self.fix.latitude,
            longitude: self.fix.longitude,
            accuracy: self.fix.accuracy,
            speed: self.fix.speed,
            heading: self.fix.heading,
            altitude: self.fix.altitude,
            timestamp: self.fix.captured_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
            kind: self.kind,
            session_id: &self.session_id,
            form_id: self.form_id.filter(|_| is_form),
            notes: self.notes.as_deref().filter(|_| is_form),
        }
    }
}

/// JSON body posted to the location-ingestion endpoint.
#[derive(Debug, Serialize)]
pub struct LocationPayload<'a> {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: LocationKind,
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn sample_fix() -> LocationFix {
        let mut fix = LocationFix::new(
            4.6097,
            -74.0817,
            7.5,
            Utc.with_ymd_and_hms(2025, 3, 1, 8, 5, 9).unwrap(),
        );
        fix.speed = Some(1.25);
        fix
    }

    #[test]
    fn test_tracking_payload_shape() {
        let item = QueuedLocation::new(sample_fix(), LocationKind::Tracking, "session-a");
        let json: Value = serde_json::to_value(item.to_payload()).unwrap();

        assert_eq!(json["timestamp"], "2025-03-01 08:05:09");
        assert_eq!(json["type"], "tracking");
        assert_eq!(json["session_id"], "session-a");
        assert_eq!(json["speed"], 1.25);
        assert!(json["heading"].is_null());
        assert!(json["altitude"].is_null());
        assert!(json.get("form_id").is_none());
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_form_payload_carries_form_fields() {
        let item = QueuedLocation::new(sample_fix(), LocationKind::FormStart, "session-a")
            .with_form(42, "pump inspection");
        let json: Value = serde_json::to_value(item.to_payload()).unwrap();

        assert_eq!(json["type"], "form_start");
        assert_eq!(json["form_id"], 42);
        assert_eq!(json["notes"], "pump inspection");
    }

    #[test]
    fn test_form_fields_ignored_for_other_kinds() {
        let item = QueuedLocation::new(sample_fix(), LocationKind::Login, "session-a")
            .with_form(42, "ignored");
        assert_eq!(item.form_id, None);
        assert_eq!(item.notes, None);
    }

    #[test]
    fn test_stored_representation_restores_item() {
        let item = QueuedLocation::new(sample_fix(), LocationKind::FormEnd, "session-b")
            .with_form(7, "done");
        let stored = serde_json::to_string(&item).unwrap();
        let restored: QueuedLocation = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, item);
    }
}
