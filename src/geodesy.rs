//! Spherical geodesy helpers.
//!
//! Everything here works on a sphere of radius [`EARTH_RADIUS_M`]. The
//! propagator ([`destination_point`]) is the position-update half of the
//! trajectory rollout; the distance and bearing functions are used to derive
//! training targets and to score predictions.

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Wrap a longitude in degrees into [-180, 180].
///
/// Values already inside the interval are returned unchanged, so 180.0 stays
/// 180.0 rather than flipping to -180.0.
pub fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        return lon;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can land on exactly 360.0 for tiny negative inputs due to rounding
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Project a point along a great circle.
///
/// Starting at (`lat`, `lon`) in degrees, travel `displacement_m` metres on an
/// initial bearing of `heading_deg` (clockwise from true north). Returns the
/// destination as (latitude, longitude) in degrees with longitude wrapped into
/// [-180, 180].
///
/// Negative displacements and headings outside [0, 360) are accepted as-is:
/// a negative displacement travels backwards along the bearing and any
/// heading is reduced by the trigonometry. NaN inputs propagate to NaN output.
pub fn destination_point(lat: f64, lon: f64, displacement_m: f64, heading_deg: f64) -> (f64, f64) {
    if displacement_m == 0.0 {
        return (lat, lon);
    }

    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();
    let theta = heading_deg.to_radians();
    let delta = displacement_m / EARTH_RADIUS_M;

    let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
    // Clamp guards asin against |x| drifting a hair above 1.0
    let phi2 = sin_phi2.clamp(-1.0, 1.0).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    (phi2.to_degrees(), wrap_longitude(lambda2.to_degrees()))
}

/// Great-circle (haversine) distance in metres between two points in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().clamp(0.0, 1.0).asin();
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from point 1 to point 2, in degrees [0, 360).
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_zero_displacement_returns_input() {
        let (lat, lon) = destination_point(82.5, -140.25, 0.0, 137.0);
        assert_eq!(lat, 82.5);
        assert_eq!(lon, -140.25);
    }

    #[test]
    fn test_due_north_one_degree() {
        // One degree of arc along a meridian
        let metres = EARTH_RADIUS_M * 1f64.to_radians();
        let (lat, lon) = destination_point(70.0, 10.0, metres, 0.0);
        assert!((lat - 71.0).abs() < 1e-6, "lat = {lat}");
        assert!((lon - 10.0).abs() < 1e-6, "lon = {lon}");
    }

    #[test]
    fn test_longitude_wraps_past_antimeridian() {
        // Heading due east from just west of 180 at the equator
        let metres = EARTH_RADIUS_M * 2f64.to_radians();
        let (lat, lon) = destination_point(0.0, 179.5, metres, 90.0);
        assert!(lat.abs() < 1e-6);
        assert!((-180.0..=180.0).contains(&lon), "lon = {lon}");
        assert!((lon - (-178.5)).abs() < 1e-6, "lon = {lon}");
    }

    #[test]
    fn test_longitude_always_in_range_near_pole() {
        for heading in [0.0, 45.0, 90.0, 180.0, 270.0, 359.0, 720.0, -30.0] {
            let (_, lon) = destination_point(89.9, 175.0, 50_000.0, heading);
            assert!((-180.0..=180.0).contains(&lon), "heading {heading}: lon = {lon}");
        }
    }

    #[test]
    fn test_negative_displacement_reverses_direction() {
        let (lat_fwd, _) = destination_point(75.0, 0.0, 10_000.0, 0.0);
        let (lat_back, _) = destination_point(75.0, 0.0, -10_000.0, 0.0);
        assert!(lat_fwd > 75.0);
        assert!(lat_back < 75.0);
        assert!(((lat_fwd - 75.0) - (75.0 - lat_back)).abs() < 1e-6);
    }

    #[test]
    fn test_nan_propagates() {
        let (lat, lon) = destination_point(f64::NAN, 0.0, 100.0, 0.0);
        assert!(lat.is_nan());
        assert!(lon.is_nan());
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(180.0), 180.0);
        assert_eq!(wrap_longitude(-180.0), -180.0);
        assert!((wrap_longitude(190.0) - (-170.0)).abs() < EPS);
        assert!((wrap_longitude(-190.0) - 170.0).abs() < EPS);
        assert!((wrap_longitude(540.0) - (-180.0)).abs() < EPS);
        assert!((wrap_longitude(359.75) - (-0.25)).abs() < EPS);
    }

    #[test]
    fn test_haversine_matches_destination() {
        let (lat2, lon2) = destination_point(78.0, 15.0, 25_000.0, 60.0);
        let d = haversine_distance(78.0, 15.0, lat2, lon2);
        assert!((d - 25_000.0).abs() < 1e-3, "d = {d}");
    }

    #[test]
    fn test_bearing_matches_destination() {
        let (lat2, lon2) = destination_point(60.0, -30.0, 5_000.0, 250.0);
        let b = initial_bearing(60.0, -30.0, lat2, lon2);
        assert!((b - 250.0).abs() < 1e-6, "b = {b}");
    }

    #[test]
    fn test_bearing_range() {
        let b = initial_bearing(0.0, 0.0, 0.0, -1.0);
        assert!((b - 270.0).abs() < 1e-9);
        let b = initial_bearing(10.0, 0.0, 9.0, 0.0);
        assert!((b - 180.0).abs() < 1e-9);
    }
}
