use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One position/velocity/time observation, raw or smoothed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// meters
    pub altitude: f64,
    /// m/s
    pub speed: f64,
    /// degrees, 0-360
    pub course: f64,
}

impl Fix {
    /// Fix at the null island with no motion, used when fusion is disabled.
    pub fn zero(timestamp: DateTime<Utc>) -> Self {
        Fix {
            timestamp,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
        }
    }

    /// Stationary fix at a known position
    pub fn stationary(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Fix {
            timestamp,
            latitude,
            longitude,
            altitude,
            speed: 0.0,
            course: 0.0,
        }
    }

    /// Both coordinates exactly zero: nobody knows where we are.
    pub fn is_degenerate(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed * 3.6
    }
}

/// Satellite usage from a gpsd SKY report
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Satellites {
    pub timestamp: DateTime<Utc>,
    pub used: u32,
    pub visible: u32,
}

impl Satellites {
    pub fn none(timestamp: DateTime<Utc>) -> Self {
        Satellites {
            timestamp,
            used: 0,
            visible: 0,
        }
    }
}

/// Where the static fallback position came from
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl StaticPosition {
    pub fn fix_at(&self, timestamp: DateTime<Utc>) -> Fix {
        Fix::stationary(timestamp, self.latitude, self.longitude, self.altitude)
    }
}
