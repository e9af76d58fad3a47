pub mod axis_kalman;

use chrono::{DateTime, Utc};

use crate::geo::{axis_rates_to_velocity, velocity_to_axis_rates};
use crate::types::Fix;
use axis_kalman::{AxisKalman, AxisNoise};

/// Latitude and longitude filters driven from speed/course fixes.
#[derive(Clone, Debug)]
pub struct PositionFilter {
    lat: AxisKalman,
    lon: AxisKalman,
}

impl PositionFilter {
    pub fn new(noise: AxisNoise) -> Self {
        Self {
            lat: AxisKalman::new(noise),
            lon: AxisKalman::new(noise),
        }
    }

    /// Smooth a raw fix. Altitude and timestamp pass through.
    pub fn update(&mut self, raw: &Fix) -> Fix {
        let (v_lat, v_lon) = velocity_to_axis_rates(raw.speed, raw.course, raw.latitude);
        let (lat, v_lat) = self.lat.update(raw.latitude, v_lat, raw.timestamp);
        let (lon, v_lon) = self.lon.update(raw.longitude, v_lon, raw.timestamp);
        let (speed, course) = axis_rates_to_velocity(v_lat, v_lon, lat);

        Fix {
            timestamp: raw.timestamp,
            latitude: lat,
            longitude: lon,
            altitude: raw.altitude,
            speed,
            course,
        }
    }

    /// Dead-reckon both axes to `now`.
    ///
    /// `reference_lat` scales the longitude rate back to meters; callers pass
    /// the latitude of the last real fix.
    pub fn predict(&self, now: DateTime<Utc>, reference_lat: f64, altitude: f64) -> Fix {
        let (lat, v_lat) = self.lat.predict(now);
        let (lon, v_lon) = self.lon.predict(now);
        let (speed, course) = axis_rates_to_velocity(v_lat, v_lon, reference_lat);

        Fix {
            timestamp: now,
            latitude: lat,
            longitude: lon,
            altitude,
            speed,
            course,
        }
    }
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::new(AxisNoise::default())
    }
}
