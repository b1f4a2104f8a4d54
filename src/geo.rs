pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two WGS84 points, in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_distance(4.6097, -74.0817, 4.6097, -74.0817), 0.0);
    }

    #[test]
    fn test_bogota_to_medellin() {
        // roughly 240 km
        let d = haversine_distance(4.6097, -74.0817, 6.2442, -75.5812);
        assert!(d > 235_000.0 && d < 250_000.0, "got {d}");
    }

    #[test]
    fn test_short_meridian_offset() {
        // one thousandth of a degree of latitude is ~111 m
        let d = haversine_distance(4.6097, -74.0817, 4.6107, -74.0817);
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }
}
