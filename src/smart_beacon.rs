use chrono::{DateTime, Utc};

use crate::config::ThresholdConfig;
use crate::geo::{haversine_distance, heading_delta};
use crate::types::Fix;

/// Distance from the parking anchor that counts as "started moving"
pub const PARKED_RADIUS_M: f64 = 10.0;
/// At or below this speed the station is considered stopped
pub const STOPPED_SPEED_KMH: f64 = 3.0;
/// Turns are ignored at or below this speed
pub const TURN_MIN_SPEED_KMH: f64 = 5.0;

/// Why a position report is due
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Trigger {
    /// Heading changed by `heading_change` against a `threshold`
    Turn { heading_change: f64, threshold: f64 },
    /// Speed-dependent interval elapsed
    RateExpired { rate: u32 },
}

/// Memory-only SmartBeaconing state; a new session starts fresh.
#[derive(Clone, Debug, Default)]
struct BeaconState {
    last_beacon_time: Option<DateTime<Utc>>,
    last_course: f64,
    parked_latitude: f64,
    parked_longitude: f64,
    is_moving: bool,
    initialized: bool,
}

/// Decides when a moving station should send a position report: faster
/// reports at higher speed, extra reports on turns, none while parked.
#[derive(Clone, Debug)]
pub struct SmartBeacon {
    thresholds: ThresholdConfig,
    state: BeaconState,
}

impl SmartBeacon {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            state: BeaconState::default(),
        }
    }

    pub fn is_moving(&self) -> bool {
        self.state.is_moving
    }

    pub fn last_beacon_time(&self) -> Option<DateTime<Utc>> {
        self.state.last_beacon_time
    }

    pub fn should_report(&mut self, fix: &Fix) -> bool {
        self.should_report_at(fix, Utc::now())
    }

    /// Evaluate `fix` at wall time `now`; records the report when true.
    pub fn should_report_at(&mut self, fix: &Fix, now: DateTime<Utc>) -> bool {
        self.evaluate(fix, now).is_some()
    }

    pub fn evaluate(&mut self, fix: &Fix, now: DateTime<Utc>) -> Option<Trigger> {
        let state = &mut self.state;
        if !state.initialized {
            state.parked_latitude = fix.latitude;
            state.parked_longitude = fix.longitude;
            state.initialized = true;
        }

        let speed_kmh = fix.speed_kmh();
        if !state.is_moving {
            let moved = haversine_distance(
                fix.latitude,
                fix.longitude,
                state.parked_latitude,
                state.parked_longitude,
            );
            if moved <= PARKED_RADIUS_M {
                return None;
            }
            state.is_moving = true;
            log::info!("SmartBeaconing: Movement detected (>{}m), enabled.", PARKED_RADIUS_M);
        }

        if speed_kmh <= STOPPED_SPEED_KMH {
            state.is_moving = false;
            state.parked_latitude = fix.latitude;
            state.parked_longitude = fix.longitude;
            log::info!("SmartBeaconing: Stopped moving, disabled.");
            return None;
        }

        let rate = self.rate_for(speed_kmh);
        let elapsed = self
            .state
            .last_beacon_time
            .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(f64::INFINITY);

        let trigger = match self.turn(fix.course, speed_kmh) {
            Some((heading_change, threshold))
                if elapsed > self.thresholds.min_turn_time as f64 =>
            {
                log::debug!(
                    "SmartBeaconing: Turn detected (Heading difference: {:.1}, Threshold: {:.1})",
                    heading_change,
                    threshold
                );
                Trigger::Turn {
                    heading_change,
                    threshold,
                }
            }
            _ if elapsed > rate as f64 => {
                log::debug!(
                    "SmartBeaconing: Rate expired (Rate: {}, Speed: {:.0})",
                    rate,
                    speed_kmh
                );
                Trigger::RateExpired { rate }
            }
            _ => return None,
        };

        self.state.last_beacon_time = Some(now);
        self.state.last_course = fix.course;
        Some(trigger)
    }

    /// Seconds between reports at `speed_kmh`, linear between the slow and
    /// fast corners and truncated to whole seconds.
    pub fn rate_for(&self, speed_kmh: f64) -> u32 {
        let t = &self.thresholds;
        if speed_kmh >= t.fast_speed {
            return t.fast_rate;
        }
        if speed_kmh <= t.slow_speed {
            return t.slow_rate;
        }
        let slow_rate = t.slow_rate as f64;
        let fast_rate = t.fast_rate as f64;
        let rate = slow_rate
            - (speed_kmh - t.slow_speed) * (slow_rate - fast_rate) / (t.fast_speed - t.slow_speed);
        rate as u32
    }

    /// `(heading_change, threshold)` when the course change since the last
    /// report exceeds the speed-scaled turn threshold.
    fn turn(&self, course: f64, speed_kmh: f64) -> Option<(f64, f64)> {
        if speed_kmh <= TURN_MIN_SPEED_KMH {
            return None;
        }
        let heading_change = heading_delta(course, self.state.last_course);
        let threshold =
            self.thresholds.min_turn_angle + self.thresholds.turn_slope / speed_kmh.max(1.0);
        (heading_change > threshold).then_some((heading_change, threshold))
    }
}
