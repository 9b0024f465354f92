//! Great-circle distances for tracking-session odometry.

use crate::models::driver::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two fixes, in kilometres.
pub fn distance_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let (from_lat, to_lat) = (from.lat.to_radians(), to.lat.to_radians());
    let half_dlat = (to_lat - from_lat) / 2.0;
    let half_dlng = (to.lng - from.lng).to_radians() / 2.0;

    let chord =
        half_dlat.sin().powi(2) + from_lat.cos() * to_lat.cos() * half_dlng.sin().powi(2);
    2.0 * EARTH_RADIUS_KM * chord.sqrt().atan2((1.0 - chord).sqrt())
}

/// Distance a session odometer advances by for a new fix. The first fix of
/// a driver has nothing to measure from.
pub fn session_step_km(previous: Option<&GeoPoint>, next: &GeoPoint) -> f64 {
    previous.map_or(0.0, |from| distance_km(from, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSTA: GeoPoint = GeoPoint {
        lat: -6.8161,
        lng: 39.2803,
    };
    const UBUNGO: GeoPoint = GeoPoint {
        lat: -6.7880,
        lng: 39.2072,
    };

    #[test]
    fn first_fix_does_not_move_the_odometer() {
        assert_eq!(session_step_km(None, &POSTA), 0.0);
        assert!(session_step_km(Some(&POSTA), &POSTA) < 1e-9);
    }

    #[test]
    fn cross_town_step_is_symmetric() {
        let outbound = session_step_km(Some(&POSTA), &UBUNGO);
        let inbound = session_step_km(Some(&UBUNGO), &POSTA);
        assert!((8.0..9.5).contains(&outbound), "got {outbound}");
        assert!((outbound - inbound).abs() < 1e-9);
    }
}
