use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

/// One position sample reported by the device location service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Estimated horizontal error in meters.
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Device clock at the moment of the fix, not the enqueue time.
    pub captured_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            speed: None,
            heading: None,
            altitude: None,
            captured_at,
        }
    }

    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Every numeric field survives a JSON round trip: JSON has no NaN or
    /// infinity.
    pub fn is_well_formed(&self) -> bool {
        let finite = |v: Option<f64>| v.map_or(true, f64::is_finite);
        self.has_valid_coordinates()
            && self.accuracy.is_finite()
            && self.accuracy >= 0.0
            && finite(self.speed)
            && finite(self.heading)
            && finite(self.altitude)
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &LocationFix) -> f64 {
        geo::haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(LocationFix::new(4.6097, -74.0817, 12.0, t).has_valid_coordinates());
        assert!(!LocationFix::new(95.0, -74.0817, 12.0, t).has_valid_coordinates());
        assert!(!LocationFix::new(4.6, f64::NAN, 12.0, t).has_valid_coordinates());
    }

    #[test]
    fn test_non_finite_fields_are_not_well_formed() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let fix = LocationFix::new(4.6097, -74.0817, 12.0, t);
        assert!(fix.is_well_formed());
        assert!(!LocationFix::new(4.6097, -74.0817, f64::INFINITY, t).is_well_formed());
        assert!(!LocationFix::new(4.6097, -74.0817, -1.0, t).is_well_formed());
        let mut moving = fix.clone();
        moving.speed = Some(f64::NAN);
        assert!(!moving.is_well_formed());
    }

    #[test]
    fn test_deserializes_without_optional_motion_fields() {
        let raw = r#"{"latitude":4.6,"longitude":-74.08,"accuracy":8.5,"captured_at":"2025-03-01T12:00:00Z"}"#;
        let fix: LocationFix = serde_json::from_str(raw).unwrap();
        assert_eq!(fix.speed, None);
        assert_eq!(fix.altitude, None);
        assert_eq!(fix.accuracy, 8.5);
    }
}
