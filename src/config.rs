use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::error::{BResult, BeaconError};
use crate::filters::axis_kalman::AxisNoise;
use crate::types::StaticPosition;

/// Read at the start of every session, overriding the inherited environment
pub const ENV_FILE: &str = ".env";

/// Load `path` into the process environment, overriding variables already
/// set, so a reload sees edits made since the last session. A missing file is
/// not an error. Returns whether a file was read.
pub fn overlay_env_file(path: &Path) -> BResult<bool> {
    match dotenvy::from_filename_override(path) {
        Ok(_) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(BeaconError::Config(format!("{}: {}", path.display(), e))),
    }
}

/// Where outgoing reports go
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Log each report as a structured line
    Log,
    /// Newline-delimited JSON over TCP to `server:port`
    Tcp,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "smart_beacon")]
#[command(about = "Adaptive position beacon daemon with gpsd fusion", long_about = None)]
pub struct Config {
    /// Station callsign
    #[arg(long, env = "APRS_CALL", default_value = "N0CALL")]
    pub call: String,

    /// Station SSID (0 = none)
    #[arg(long, env = "APRS_SSID", default_value = "0")]
    pub ssid: String,

    /// Telemetry interval in scheduler ticks (0 disables telemetry)
    #[arg(long, env = "SLEEP", default_value_t = 600)]
    pub sleep: u32,

    /// Static latitude used when no fix is available
    #[arg(long, env = "APRS_LATITUDE", default_value_t = 0.0, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Static longitude used when no fix is available
    #[arg(long, env = "APRS_LONGITUDE", default_value_t = 0.0, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Static altitude in meters
    #[arg(long, env = "APRS_ALTITUDE", default_value_t = 0.0, allow_negative_numbers = true)]
    pub altitude: f64,

    /// Report server host (TCP sink)
    #[arg(long, env = "APRSIS_SERVER", default_value = "rotate.aprs2.net")]
    pub server: String,

    /// Report server port (TCP sink)
    #[arg(long, env = "APRSIS_PORT", default_value_t = 14580)]
    pub port: u16,

    /// Report sink
    #[arg(long, env = "SINK", value_enum, default_value_t = SinkKind::Log)]
    pub sink: SinkKind,

    /// Enable gpsd position fusion
    #[arg(long, env = "GPSD_ENABLE", default_value_t = false, action = clap::ArgAction::Set, value_parser = parse_flag)]
    pub gpsd_enabled: bool,

    #[arg(long, env = "GPSD_HOST", default_value = "localhost")]
    pub gpsd_host: String,

    #[arg(long, env = "GPSD_PORT", default_value_t = 2947)]
    pub gpsd_port: u16,

    /// Enable speed/turn adaptive position reports
    #[arg(long, env = "SMARTBEACONING_ENABLE", default_value_t = false, action = clap::ArgAction::Set, value_parser = parse_flag)]
    pub smartbeaconing_enabled: bool,

    /// km/h at and above which the fast rate applies
    #[arg(long, env = "SMARTBEACONING_FASTSPEED", default_value_t = 100.0)]
    pub fast_speed: f64,

    /// km/h at and below which the slow rate applies
    #[arg(long, env = "SMARTBEACONING_SLOWSPEED", default_value_t = 10.0)]
    pub slow_speed: f64,

    /// Seconds between reports at fast speed
    #[arg(long, env = "SMARTBEACONING_FASTRATE", default_value_t = 60)]
    pub fast_rate: u32,

    /// Seconds between reports at slow speed
    #[arg(long, env = "SMARTBEACONING_SLOWRATE", default_value_t = 600)]
    pub slow_rate: u32,

    /// Degrees
    #[arg(long, env = "SMARTBEACONING_MINTURNANGLE", default_value_t = 28.0)]
    pub min_turn_angle: f64,

    #[arg(long, env = "SMARTBEACONING_TURNSLOPE", default_value_t = 255.0)]
    pub turn_slope: f64,

    /// Seconds
    #[arg(long, env = "SMARTBEACONING_MINTURNTIME", default_value_t = 5)]
    pub min_turn_time: u32,

    #[arg(long, env = "FILTER_PROCESS_NOISE", default_value_t = 1e-6)]
    pub process_noise: f64,

    #[arg(long, env = "FILTER_POSITION_NOISE", default_value_t = 1e-4)]
    pub position_noise: f64,

    #[arg(long, env = "FILTER_VELOCITY_NOISE", default_value_t = 1e-5)]
    pub velocity_noise: f64,

    /// Directory for counters and caches
    #[arg(long, env = "STATE_DIR", default_value = "/var/tmp/smart_beacon")]
    pub state_dir: PathBuf,

    /// Weekly Thursday check-in message
    #[arg(long, env = "APRSTHURSDAY_ENABLE", default_value_t = false, action = clap::ArgAction::Set, value_parser = parse_flag)]
    pub thursday_checkin: bool,

    /// Weekly Sunday check-in message
    #[arg(long, env = "APRSMYSUNDAY_ENABLE", default_value_t = false, action = clap::ArgAction::Set, value_parser = parse_flag)]
    pub sunday_checkin: bool,

    /// Comma-separated extra callsigns that also send check-ins
    #[arg(long, env = "ADDITIONAL_SENDER", default_value = "")]
    pub additional_sender: String,
}

/// Accepts the usual truthy spellings; anything else is false.
fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "t" | "y" | "yes"
    ))
}

/// Immutable SmartBeaconing and filter tuning for one session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdConfig {
    pub fast_speed: f64,
    pub slow_speed: f64,
    pub fast_rate: u32,
    pub slow_rate: u32,
    pub min_turn_angle: f64,
    pub turn_slope: f64,
    pub min_turn_time: u32,
    pub noise: AxisNoise,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            fast_speed: 100.0,
            slow_speed: 10.0,
            fast_rate: 60,
            slow_rate: 600,
            min_turn_angle: 28.0,
            turn_slope: 255.0,
            min_turn_time: 5,
            noise: AxisNoise::default(),
        }
    }
}

impl Config {
    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig {
            fast_speed: self.fast_speed,
            slow_speed: self.slow_speed,
            fast_rate: self.fast_rate,
            slow_rate: self.slow_rate,
            min_turn_angle: self.min_turn_angle,
            turn_slope: self.turn_slope,
            min_turn_time: self.min_turn_time,
            noise: AxisNoise {
                process: self.process_noise,
                position: self.position_noise,
                velocity: self.velocity_noise,
            },
        }
    }

    /// Reject settings the beacon cannot run with.
    pub fn validate(&self) -> BResult<()> {
        if !is_valid_callsign(&self.from_call().to_ascii_uppercase()) {
            return Err(BeaconError::Config(format!("bad callsign {}", self.from_call())));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(BeaconError::Config(format!(
                "static position {}, {} out of range",
                self.latitude, self.longitude
            )));
        }
        if self.slow_speed >= self.fast_speed {
            return Err(BeaconError::Config(format!(
                "slow speed {} must be below fast speed {}",
                self.slow_speed, self.fast_speed
            )));
        }
        if self.fast_rate == 0 || self.fast_rate > self.slow_rate {
            return Err(BeaconError::Config(format!(
                "fast rate {} must be non-zero and at most slow rate {}",
                self.fast_rate, self.slow_rate
            )));
        }
        Ok(())
    }

    /// Callsign with SSID suffix, e.g. `N0CALL-9`
    pub fn from_call(&self) -> String {
        let ssid = self.ssid.trim();
        if ssid.is_empty() || ssid == "0" {
            self.call.clone()
        } else {
            format!("{}-{}", self.call, ssid)
        }
    }

    pub fn static_position(&self) -> StaticPosition {
        StaticPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
        }
    }

    /// Extra senders that pass the callsign format check; others are dropped
    /// with a warning.
    pub fn additional_senders(&self) -> Vec<String> {
        self.additional_sender
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .filter(|s| {
                let valid = is_valid_callsign(s);
                if !valid {
                    log::warn!("Invalid ADDITIONAL_SENDER format: {}. Ignoring.", s);
                }
                valid
            })
            .collect()
    }
}

/// `BASE` or `BASE-SSID`, both parts uppercase alphanumeric.
pub fn is_valid_callsign(call: &str) -> bool {
    let mut parts = call.splitn(2, '-');
    let base = parts.next().unwrap_or("");
    let part_ok = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    match parts.next() {
        Some(ssid) => part_ok(base) && part_ok(ssid),
        None => part_ok(base),
    }
}
