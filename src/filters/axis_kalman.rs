use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Noise constants for one axis filter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisNoise {
    /// Process noise spectral density (q)
    pub process: f64,
    /// Position measurement variance (r_pos)
    pub position: f64,
    /// Velocity measurement variance (r_vel)
    pub velocity: f64,
}

impl Default for AxisNoise {
    fn default() -> Self {
        Self {
            process: 1e-6,
            position: 1e-4,
            velocity: 1e-5,
        }
    }
}

/// Which measurement a correction step consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Position,
    Velocity,
}

/// Gains and innovation of one scalar correction step.
///
/// The filter applies two of these in sequence (position, then velocity)
/// instead of a joint 2x2 update, and the estimate depends on that order.
#[derive(Clone, Copy, Debug)]
pub struct Correction {
    pub channel: Channel,
    pub innovation: f64,
    pub gain_x: f64,
    pub gain_v: f64,
}

/// Constant-velocity Kalman filter for one scalar axis (latitude or longitude).
#[derive(Clone, Debug)]
pub struct AxisKalman {
    x: f64,
    v: f64,
    p_xx: f64,
    p_xv: f64,
    p_vv: f64,
    noise: AxisNoise,
    last_time: Option<DateTime<Utc>>,
}

impl AxisKalman {
    pub fn new(noise: AxisNoise) -> Self {
        Self {
            x: 0.0,
            v: 0.0,
            p_xx: 1.0,
            p_xv: 0.0,
            p_vv: 1.0,
            noise,
            last_time: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.last_time.is_some()
    }

    pub fn state(&self) -> (f64, f64) {
        (self.x, self.v)
    }

    pub fn covariance(&self) -> (f64, f64, f64) {
        (self.p_xx, self.p_xv, self.p_vv)
    }

    /// Fold one measurement into the estimate and return `(position, velocity)`.
    ///
    /// The first call adopts the measurement as-is. A timestamp at or before
    /// the last accepted one leaves the state untouched.
    pub fn update(&mut self, position: f64, velocity: f64, timestamp: DateTime<Utc>) -> (f64, f64) {
        let last_time = match self.last_time {
            None => {
                self.x = position;
                self.v = velocity;
                self.last_time = Some(timestamp);
                return (position, velocity);
            }
            Some(t) => t,
        };

        let dt = seconds_between(last_time, timestamp);
        if dt <= 0.0 {
            return (self.x, self.v);
        }
        self.last_time = Some(timestamp);

        self.propagate(dt);
        for correction in [self.correct_position(position), self.correct_velocity(velocity)] {
            log::trace!(
                "{:?} correction: innovation {:.3e}, gains ({:.4}, {:.4})",
                correction.channel,
                correction.innovation,
                correction.gain_x,
                correction.gain_v
            );
        }

        (self.x, self.v)
    }

    /// Dead-reckon to `timestamp` without touching the state.
    pub fn predict(&self, timestamp: DateTime<Utc>) -> (f64, f64) {
        match self.last_time {
            Some(last_time) => {
                let dt = seconds_between(last_time, timestamp);
                (self.x + self.v * dt, self.v)
            }
            None => (self.x, self.v),
        }
    }

    fn propagate(&mut self, dt: f64) {
        let q = self.noise.process;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;

        self.x += self.v * dt;
        self.p_xx += 2.0 * self.p_xv * dt + self.p_vv * dt2 + q * dt3 / 3.0;
        self.p_xv += self.p_vv * dt + q * dt2 / 2.0;
        self.p_vv += q * dt;
    }

    fn correct_position(&mut self, measured: f64) -> Correction {
        let innovation = measured - self.x;
        let s = self.p_xx + self.noise.position;
        let correction = Correction {
            channel: Channel::Position,
            innovation,
            gain_x: self.p_xx / s,
            gain_v: self.p_xv / s,
        };

        self.x += correction.gain_x * innovation;
        self.v += correction.gain_v * innovation;

        let (p_xx, p_xv, p_vv) = (self.p_xx, self.p_xv, self.p_vv);
        self.p_xx = (1.0 - correction.gain_x) * p_xx;
        self.p_xv = (1.0 - correction.gain_x) * p_xv;
        self.p_vv = p_vv - correction.gain_v * p_xv;
        correction
    }

    fn correct_velocity(&mut self, measured: f64) -> Correction {
        let innovation = measured - self.v;
        let s = self.p_vv + self.noise.velocity;
        let correction = Correction {
            channel: Channel::Velocity,
            innovation,
            gain_x: self.p_xv / s,
            gain_v: self.p_vv / s,
        };

        self.x += correction.gain_x * innovation;
        self.v += correction.gain_v * innovation;

        let (p_xx, p_xv, p_vv) = (self.p_xx, self.p_xv, self.p_vv);
        self.p_xx = p_xx - correction.gain_x * p_xv;
        self.p_xv = p_xv - correction.gain_x * p_vv;
        self.p_vv = p_vv - correction.gain_v * p_vv;
        correction
    }
}

impl Default for AxisKalman {
    fn default() -> Self {
        Self::new(AxisNoise::default())
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
