//! Payloads handed to a [`ReportSink`](crate::sink::ReportSink).
//!
//! These carry the values a sender needs; turning them into wire packets is
//! the sink's business.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BResult, BeaconError};
use crate::types::{Fix, Satellites};

/// Longest text a check-in message may carry
pub const MAX_MESSAGE_LEN: usize = 67;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionReport {
    pub from: String,
    pub fix: Fix,
    /// false when no fix was acquired and the static position stands in
    pub live: bool,
}

/// Telemetry channel names and units, sent once in a while so receivers can
/// label the telemetry values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeaderReport {
    pub from: String,
    pub parameters: Vec<String>,
    pub units: Vec<String>,
}

impl HeaderReport {
    pub fn new(from: &str, with_satellites: bool) -> Self {
        let mut parameters = vec!["CPUTemp", "CPULoad", "RAMUsed", "ROMUsed"];
        let mut units = vec!["deg.C", "%", "GB", "GB"];
        if with_satellites {
            parameters.push("GPSUsed");
            units.push("sats");
        }
        HeaderReport {
            from: from.to_string(),
            parameters: parameters.into_iter().map(String::from).collect(),
            units: units.into_iter().map(String::from).collect(),
        }
    }

    pub fn has_satellites_channel(&self) -> bool {
        self.parameters.iter().any(|p| p == "GPSUsed")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryReport {
    pub from: String,
    pub sequence: u32,
    /// deci-degrees Celsius
    pub cpu_temp: i64,
    /// load per core, x 100 000
    pub cpu_load: u64,
    /// bytes
    pub memory_used: u64,
    /// bytes
    pub storage_used: u64,
    pub satellites_used: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessageReport {
    /// Check-in net, e.g. `APRSThursday`
    pub name: String,
    pub from: String,
    /// Own callsign when sending on behalf of another station
    pub via: Option<String>,
    pub addressee: String,
    pub text: String,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub from: String,
    /// Truncated to the minute
    pub time: DateTime<Utc>,
    pub grid: String,
    pub uptime_secs: u64,
    pub satellites_used: Option<u32>,
    pub satellites_visible: Option<u32>,
}

impl StatusReport {
    /// Satellite time stands in for the clock while satellites are in use.
    pub fn new(
        from: &str,
        now: DateTime<Utc>,
        grid: String,
        uptime_secs: u64,
        satellites: Option<Satellites>,
    ) -> Self {
        let time = match satellites {
            Some(sats) if sats.used > 0 => sats.timestamp,
            _ => now,
        };
        let (satellites_used, satellites_visible) = match satellites {
            Some(sats) if sats.used > 0 => (Some(sats.used), Some(sats.visible)),
            Some(sats) => (Some(sats.used), None),
            None => (None, None),
        };
        StatusReport {
            from: from.to_string(),
            time: truncate_to_minute(time),
            grid,
            uptime_secs,
            satellites_used,
            satellites_visible,
        }
    }
}

fn truncate_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(TimeDelta::minutes(1)).unwrap_or(time)
}

/// One outgoing report
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Position(PositionReport),
    Header(HeaderReport),
    Telemetry(TelemetryReport),
    Message(MessageReport),
    Status(StatusReport),
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Position(_) => "position",
            Report::Header(_) => "header",
            Report::Telemetry(_) => "telemetry",
            Report::Message(_) => "message",
            Report::Status(_) => "status",
        }
    }

    pub fn validate(&self) -> BResult<()> {
        match self {
            Report::Message(msg) if msg.text.chars().count() > MAX_MESSAGE_LEN => {
                Err(BeaconError::InvalidReport(format!(
                    "message length {} exceeds limit of {} characters: {}",
                    msg.text.chars().count(),
                    MAX_MESSAGE_LEN,
                    msg.text
                )))
            }
            Report::Message(msg) if msg.addressee.is_empty() => Err(BeaconError::InvalidReport(
                format!("message {} has no addressee", msg.name),
            )),
            _ => Ok(()),
        }
    }

    /// One JSON object, no trailing newline.
    pub fn to_json_line(&self) -> BResult<String> {
        serde_json::to_string(self)
            .map_err(|e| BeaconError::InvalidReport(format!("{} report: {}", self.kind(), e)))
    }
}
