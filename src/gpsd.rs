//! Minimal blocking gpsd JSON client.
//!
//! Connects, enables watch mode and reads newline-delimited reports until one
//! of the requested class arrives. Runs on a blocking worker, never on the
//! scheduler task.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{BResult, BeaconError};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// gpsd report classes the daemon asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportClass {
    /// Time-position-velocity
    Tpv,
    /// Satellite view
    Sky,
    /// Sent once per connection; doubles as a liveness probe
    Version,
}

impl ReportClass {
    pub fn name(self) -> &'static str {
        match self {
            ReportClass::Tpv => "TPV",
            ReportClass::Sky => "SKY",
            ReportClass::Version => "VERSION",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Tpv {
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub alt: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub track: Option<f64>,
    #[serde(default)]
    pub magtrack: Option<f64>,
}

impl Tpv {
    /// 2-D or 3-D fix
    pub fn has_fix(&self) -> bool {
        self.mode > 1
    }

    /// Magnetic track when present and non-zero, else true track.
    pub fn course(&self) -> f64 {
        match self.magtrack {
            Some(m) if m != 0.0 => m,
            _ => self.track.unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Sky {
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, rename = "uSat")]
    pub u_sat: Option<u32>,
    #[serde(default, rename = "nSat")]
    pub n_sat: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub release: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "class")]
pub enum GpsdReport {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(rename = "VERSION")]
    Version(Version),
    #[serde(other)]
    Other,
}

impl GpsdReport {
    /// Parse one protocol line; unknown or malformed lines are `Other`.
    pub fn parse_line(line: &str) -> GpsdReport {
        serde_json::from_str(line.trim()).unwrap_or(GpsdReport::Other)
    }

    /// Does this report satisfy a request for `class`?
    pub fn satisfies(&self, class: ReportClass) -> bool {
        match (self, class) {
            (GpsdReport::Tpv(tpv), ReportClass::Tpv) => tpv.has_fix(),
            (GpsdReport::Sky(_), ReportClass::Sky) => true,
            (GpsdReport::Version(_), ReportClass::Version) => true,
            _ => false,
        }
    }
}

/// Blocking source of gpsd reports.
///
/// `Ok(None)` means the daemon answered but had nothing suitable in time.
pub trait PositionSource: Send + Sync + 'static {
    fn poll(&self, class: ReportClass) -> BResult<Option<GpsdReport>>;
}

/// TCP client for a gpsd instance
#[derive(Clone, Debug)]
pub struct GpsdClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl GpsdClient {
    pub fn new(host: &str, port: u16) -> Self {
        GpsdClient {
            host: host.to_string(),
            port,
            timeout: Duration::from_secs(10),
        }
    }

    fn connect(&self) -> BResult<TcpStream> {
        let endpoint = format!("{}:{}", self.host, self.port);
        let addrs = endpoint
            .to_socket_addrs()
            .map_err(|e| BeaconError::GpsdUnavailable(format!("resolve {}: {}", endpoint, e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(BeaconError::GpsdUnavailable(match last_err {
            Some(e) => format!("connect {}: {}", endpoint, e),
            None => format!("no address for {}", endpoint),
        }))
    }
}

impl PositionSource for GpsdClient {
    fn poll(&self, class: ReportClass) -> BResult<Option<GpsdReport>> {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| BeaconError::GpsdUnavailable(e.to_string()))?;
        stream
            .write_all(WATCH_COMMAND)
            .map_err(|e| BeaconError::GpsdUnavailable(format!("watch: {}", e)))?;

        let deadline = Instant::now() + self.timeout;
        read_until_class(BufReader::new(stream), class, deadline)
    }
}

/// Scan report lines until one satisfies `class`, the stream ends, or the
/// deadline passes.
pub fn read_until_class<R: BufRead>(
    mut reader: R,
    class: ReportClass,
    deadline: Instant,
) -> BResult<Option<GpsdReport>> {
    let mut line = String::new();
    loop {
        if Instant::now() >= deadline {
            log::debug!("No {} report before deadline", class.name());
            return Ok(None);
        }
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| BeaconError::GpsdProtocol(format!("read {}: {}", class.name(), e)))?;
        if read == 0 {
            return Ok(None);
        }
        let report = GpsdReport::parse_line(&line);
        if report.satisfies(class) {
            return Ok(Some(report));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SESSION: &str = concat!(
        "{\"class\":\"VERSION\",\"release\":\"3.25\",\"rev\":\"3.25\",\"proto_major\":3,\"proto_minor\":15}\n",
        "{\"class\":\"DEVICES\",\"devices\":[]}\n",
        "{\"class\":\"WATCH\",\"enable\":true,\"json\":true}\n",
        "{\"class\":\"TPV\",\"mode\":1}\n",
        "{\"class\":\"SKY\",\"time\":\"2025-06-01T12:00:00.000Z\",\"uSat\":7,\"nSat\":12}\n",
        "{\"class\":\"TPV\",\"mode\":3,\"time\":\"2025-06-01T12:00:01.000Z\",\"lat\":3.139,\"lon\":101.6869,\"alt\":56.2,\"speed\":12.5,\"track\":181.0}\n",
    );

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_skips_tpv_without_fix() {
        let report = read_until_class(Cursor::new(SESSION), ReportClass::Tpv, far_deadline())
            .unwrap()
            .unwrap();
        match report {
            GpsdReport::Tpv(tpv) => {
                assert_eq!(tpv.mode, 3);
                assert_eq!(tpv.lat, Some(3.139));
                assert_eq!(tpv.course(), 181.0);
                assert!(tpv.time.is_some());
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn test_reads_sky_counts() {
        let report = read_until_class(Cursor::new(SESSION), ReportClass::Sky, far_deadline())
            .unwrap()
            .unwrap();
        match report {
            GpsdReport::Sky(sky) => {
                assert_eq!(sky.u_sat, Some(7));
                assert_eq!(sky.n_sat, Some(12));
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn test_version_is_first_report() {
        let report = read_until_class(Cursor::new(SESSION), ReportClass::Version, far_deadline())
            .unwrap();
        assert!(matches!(report, Some(GpsdReport::Version(v)) if v.release == "3.25"));
    }

    #[test]
    fn test_stream_end_without_match() {
        let lines = "{\"class\":\"TPV\",\"mode\":0}\n";
        let report = read_until_class(Cursor::new(lines), ReportClass::Tpv, far_deadline()).unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_expired_deadline_returns_none() {
        let report = read_until_class(Cursor::new(SESSION), ReportClass::Tpv, Instant::now()).unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_garbage_lines_are_ignored() {
        assert_eq!(GpsdReport::parse_line("not json"), GpsdReport::Other);
        assert_eq!(GpsdReport::parse_line("{\"class\":\"PPS\"}"), GpsdReport::Other);
    }

    #[test]
    fn test_magtrack_preferred_when_nonzero() {
        let tpv = Tpv {
            mode: 3,
            time: None,
            lat: None,
            lon: None,
            alt: None,
            speed: None,
            track: Some(90.0),
            magtrack: Some(0.0),
        };
        assert_eq!(tpv.course(), 90.0);
        let tpv = Tpv {
            magtrack: Some(93.5),
            ..tpv
        };
        assert_eq!(tpv.course(), 93.5);
    }
}
