//! Spherical-earth helpers shared by the filter, the trigger and the reports.

use std::f64::consts::PI;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude
const METERS_PER_DEG: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Great-circle distance in meters (haversine).
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Speed (m/s) and course (deg) to per-axis angular rates (deg/s).
///
/// Longitude is scaled by `cos(lat)`; at the poles the east rate is 0.
pub fn velocity_to_axis_rates(speed: f64, course_deg: f64, lat: f64) -> (f64, f64) {
    let course = course_deg.to_radians();
    let v_north = speed * course.cos();
    let v_east = speed * course.sin();

    let v_lat = v_north / METERS_PER_DEG;
    let cos_lat = lat.to_radians().cos();
    let v_lon = if cos_lat != 0.0 {
        v_east / (METERS_PER_DEG * cos_lat)
    } else {
        0.0
    };
    (v_lat, v_lon)
}

/// Inverse of [`velocity_to_axis_rates`]: returns `(speed m/s, course deg)`.
pub fn axis_rates_to_velocity(v_lat: f64, v_lon: f64, lat: f64) -> (f64, f64) {
    let v_north = v_lat * METERS_PER_DEG;
    let v_east = v_lon * METERS_PER_DEG * lat.to_radians().cos();
    let speed = v_north.hypot(v_east);
    let course = (v_east.atan2(v_north).to_degrees() + 360.0) % 360.0;
    (speed, course)
}

/// Smallest angle between two headings, in degrees (0..=180).
pub fn heading_delta(a: f64, b: f64) -> f64 {
    let delta = (a - b).abs() % 360.0;
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}

/// Maidenhead locator, 2/4/6 characters depending on `precision`.
pub fn maidenhead_grid(lat: f64, lon: f64, precision: usize) -> String {
    let lon = lon + 180.0;
    let lat = lat + 90.0;

    let field_lon = (lon / 20.0).floor() as u8;
    let field_lat = (lat / 10.0).floor() as u8;
    let mut grid = String::with_capacity(precision);
    grid.push((b'A' + field_lon.min(17)) as char);
    grid.push((b'A' + field_lat.min(17)) as char);

    if precision >= 4 {
        let square_lon = ((lon % 20.0) / 2.0).floor() as u8;
        let square_lat = (lat % 10.0).floor() as u8;
        grid.push((b'0' + square_lon.min(9)) as char);
        grid.push((b'0' + square_lat.min(9)) as char);
    }
    if precision >= 6 {
        let sub_lon = (((lon % 2.0) / 2.0) * 24.0).floor() as u8;
        let sub_lat = ((lat % 1.0) * 24.0).floor() as u8;
        grid.push((b'A' + sub_lon.min(23)) as char);
        grid.push((b'A' + sub_lat.min(23)) as char);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_haversine_zero_distance() {
        assert_abs_diff_eq!(haversine_distance(3.1, 101.6, 3.1, 101.6), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert_abs_diff_eq!(d, METERS_PER_DEG, epsilon = 1e-6);
    }

    #[test]
    fn test_velocity_round_trip() {
        let (v_lat, v_lon) = velocity_to_axis_rates(20.0, 135.0, 45.0);
        assert!(v_lat < 0.0);
        assert!(v_lon > 0.0);

        let (speed, course) = axis_rates_to_velocity(v_lat, v_lon, 45.0);
        assert_abs_diff_eq!(speed, 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(course, 135.0, epsilon = 1e-9);
    }

    #[test]
    fn test_course_is_normalised() {
        let (v_lat, v_lon) = velocity_to_axis_rates(5.0, 270.0, 0.0);
        let (_, course) = axis_rates_to_velocity(v_lat, v_lon, 0.0);
        assert_abs_diff_eq!(course, 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_heading_delta_wraps() {
        assert_abs_diff_eq!(heading_delta(10.0, 350.0), 20.0);
        assert_abs_diff_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_abs_diff_eq!(heading_delta(90.0, 0.0), 90.0);
        assert_abs_diff_eq!(heading_delta(180.0, 0.0), 180.0);
    }

    #[test]
    fn test_maidenhead_grid() {
        assert_eq!(maidenhead_grid(37.7749, -122.4194, 6), "CM87SS");
        assert_eq!(maidenhead_grid(3.139, 101.6869, 4), "OJ03");
        assert_eq!(maidenhead_grid(0.0, 0.0, 2), "JJ");
    }
}
