use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{BResult, BeaconError};
use crate::filters::axis_kalman::AxisNoise;
use crate::filters::PositionFilter;
use crate::gpsd::{GpsdClient, GpsdReport, PositionSource, ReportClass, Tpv};
use crate::health_monitor::{GpsHealth, HealthMonitor};
use crate::storage::{CachedFix, JsonFile};
use crate::types::{Fix, Satellites, StaticPosition};

pub const IP_GEOLOCATION_URL: &str = "http://ip-api.com/json/";

/// Sources tried, in order, when gpsd cannot deliver a fix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// Dead-reckon the filters from the last real fix
    FilteredEstimate,
    /// Last smoothed position written to disk
    CachedFix,
    /// Configured coordinates; always answers
    StaticConfig,
}

pub const FALLBACK_LADDER: [Fallback; 3] = [
    Fallback::FilteredEstimate,
    Fallback::CachedFix,
    Fallback::StaticConfig,
];

/// Where an acquired fix came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixSource {
    /// Smoothed from a gpsd TPV report this call
    Gpsd,
    Fallback(Fallback),
    /// gpsd fusion is switched off; the fix is all zeros
    Disabled,
}

/// A fix and its provenance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Acquired {
    pub fix: Fix,
    pub source: FixSource,
}

impl Acquired {
    /// True only for a usable fix that gpsd delivered this call.
    pub fn is_live(&self) -> bool {
        self.source == FixSource::Gpsd && !self.fix.is_degenerate()
    }
}

/// Turns an intermittent gpsd feed into a fix on every call.
///
/// Owned by the scheduler task. Only the health flag is shared, with the
/// background [`HealthMonitor`].
pub struct GpsAcquisition {
    enabled: bool,
    source: Arc<dyn PositionSource>,
    health: Arc<GpsHealth>,
    filter: PositionFilter,
    last_valid: Option<Fix>,
    cache: JsonFile<CachedFix>,
    static_position: StaticPosition,
}

impl GpsAcquisition {
    pub fn new(
        enabled: bool,
        source: Arc<dyn PositionSource>,
        state_dir: &Path,
        static_position: StaticPosition,
        noise: AxisNoise,
    ) -> Self {
        GpsAcquisition {
            enabled,
            source,
            health: Arc::new(GpsHealth::new(enabled)),
            filter: PositionFilter::new(noise),
            last_valid: None,
            cache: JsonFile::new(state_dir.join("gps.json")),
            static_position,
        }
    }

    pub fn from_config(cfg: &Config, static_position: StaticPosition) -> Self {
        let client = GpsdClient::new(&cfg.gpsd_host, cfg.gpsd_port);
        Self::new(
            cfg.gpsd_enabled,
            Arc::new(client),
            &cfg.state_dir,
            static_position,
            cfg.thresholds().noise,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn health(&self) -> Arc<GpsHealth> {
        Arc::clone(&self.health)
    }

    /// Background probe sharing this acquisition's health flag and source.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.health(), Arc::clone(&self.source))
    }

    pub fn static_position(&self) -> StaticPosition {
        self.static_position
    }

    pub fn set_static_position(&mut self, position: StaticPosition) {
        self.static_position = position;
    }

    pub async fn acquire_fix(&mut self) -> Acquired {
        self.acquire_fix_at(Utc::now()).await
    }

    /// Best available fix at `now`: smoothed live fix, else the fallback ladder.
    pub async fn acquire_fix_at(&mut self, now: DateTime<Utc>) -> Acquired {
        if !self.enabled {
            return Acquired {
                fix: Fix::zero(now),
                source: FixSource::Disabled,
            };
        }

        if let Some(GpsdReport::Tpv(tpv)) = self.retrieve(ReportClass::Tpv).await {
            return Acquired {
                fix: self.fuse(&tpv, now),
                source: FixSource::Gpsd,
            };
        }

        self.fallback(now)
    }

    fn fuse(&mut self, tpv: &Tpv, now: DateTime<Utc>) -> Fix {
        let raw = Fix {
            timestamp: tpv.time.unwrap_or(now),
            latitude: tpv.lat.unwrap_or(0.0),
            longitude: tpv.lon.unwrap_or(0.0),
            altitude: tpv.alt.unwrap_or(0.0),
            speed: tpv.speed.unwrap_or(0.0),
            course: tpv.course(),
        };
        let smoothed = self.filter.update(&raw);
        log::debug!(
            "{} | GPS Position (Smoothed): {}, {}, {}, {:.2}, {:.1}",
            smoothed.timestamp,
            smoothed.latitude,
            smoothed.longitude,
            smoothed.altitude,
            smoothed.speed,
            smoothed.course
        );

        self.cache.save_or_log(&CachedFix {
            lat: smoothed.latitude,
            lon: smoothed.longitude,
            alt: smoothed.altitude,
        });
        self.last_valid = Some(smoothed);
        smoothed
    }

    /// Walk [`FALLBACK_LADDER`] until a source yields usable coordinates.
    pub fn fallback(&self, now: DateTime<Utc>) -> Acquired {
        for step in FALLBACK_LADDER {
            if let Some(fix) = self.try_fallback(step, now) {
                log::debug!(
                    "Using {:?} fallback: {}, {}, {}, {:.2}, {:.1}",
                    step,
                    fix.latitude,
                    fix.longitude,
                    fix.altitude,
                    fix.speed,
                    fix.course
                );
                return Acquired {
                    fix,
                    source: FixSource::Fallback(step),
                };
            }
        }
        Acquired {
            fix: self.static_position.fix_at(now),
            source: FixSource::Fallback(Fallback::StaticConfig),
        }
    }

    fn try_fallback(&self, step: Fallback, now: DateTime<Utc>) -> Option<Fix> {
        match step {
            Fallback::FilteredEstimate => {
                let last = self.last_valid?;
                let fix = self.filter.predict(now, last.latitude, last.altitude);
                (!fix.is_degenerate()).then_some(fix)
            }
            Fallback::CachedFix => {
                let cached = self.cache.load();
                (!cached.is_degenerate())
                    .then(|| Fix::stationary(now, cached.lat, cached.lon, cached.alt))
            }
            Fallback::StaticConfig => Some(self.static_position.fix_at(now)),
        }
    }

    /// Satellites in use and in view; zeros when gpsd has nothing.
    pub async fn satellites(&self) -> Satellites {
        let now = Utc::now();
        if !self.enabled {
            return Satellites::none(now);
        }
        match self.retrieve(ReportClass::Sky).await {
            Some(GpsdReport::Sky(sky)) => Satellites {
                timestamp: sky.time.unwrap_or(now),
                used: sky.u_sat.unwrap_or(0),
                visible: sky.n_sat.unwrap_or(0),
            },
            _ => Satellites::none(now),
        }
    }

    /// Coordinates a report should carry: the fix when it knows where it is,
    /// otherwise the static position at rest, stamped now.
    pub fn report_location(&self, fix: Option<&Fix>) -> Fix {
        match fix {
            Some(fix) if !fix.is_degenerate() => *fix,
            _ => self.static_position.fix_at(Utc::now()),
        }
    }

    /// One blocking poll on a worker thread. Failures downgrade health and
    /// never escape.
    async fn retrieve(&self, class: ReportClass) -> Option<GpsdReport> {
        if !self.health.is_healthy() {
            log::warn!(
                "GPSD is marked as unhealthy, skipping retrieval for {}.",
                class.name()
            );
            return None;
        }

        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || source.poll(class)).await {
            Ok(Ok(Some(report))) => {
                // Only reachable while healthy, unless the probe flipped the
                // flag during the poll.
                if self.health.mark_healthy() {
                    log::info!("GPSD connection restored during data retrieval.");
                }
                Some(report)
            }
            Ok(Ok(None)) => {
                log::warn!("GPS {} unavailable.", class.name());
                self.health.mark_unhealthy();
                None
            }
            Ok(Err(e)) => {
                log::error!("GPSD ({}) connection error: {}", class.name(), e);
                self.health.mark_unhealthy();
                None
            }
            Err(e) => {
                log::error!("GPSD ({}) worker failed: {}", class.name(), e);
                self.health.mark_unhealthy();
                None
            }
        }
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    lat: f64,
    lon: f64,
}

/// Approximate coordinates from the public IP address.
pub async fn locate_by_ip(url: &str) -> BResult<(f64, f64)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("smart_beacon/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BeaconError::Transport(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BeaconError::Transport(format!("{}: {}", url, e)))?;
    let body: IpApiResponse = response
        .json()
        .await
        .map_err(|e| BeaconError::Transport(format!("unexpected response from {}: {}", url, e)))?;
    Ok((body.lat, body.lon))
}

/// Static position for a new session: configured coordinates, or an IP
/// lookup when none are configured.
pub async fn resolve_static_position(cfg: &Config) -> StaticPosition {
    let mut position = cfg.static_position();
    if position.latitude == 0.0 && position.longitude == 0.0 {
        match locate_by_ip(IP_GEOLOCATION_URL).await {
            Ok((lat, lon)) => {
                log::debug!("IP-Position: {}, {}", lat, lon);
                position.latitude = lat;
                position.longitude = lon;
            }
            Err(e) => log::error!("Failed to fetch coordinates: {}", e),
        }
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpsd::Sky;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned poll results in order; empty script means "refused".
    struct ScriptedSource {
        script: Mutex<VecDeque<BResult<Option<GpsdReport>>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<BResult<Option<GpsdReport>>>) -> Arc<Self> {
            Arc::new(ScriptedSource {
                script: Mutex::new(script.into()),
            })
        }
    }

    impl PositionSource for ScriptedSource {
        fn poll(&self, _class: ReportClass) -> BResult<Option<GpsdReport>> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BeaconError::GpsdUnavailable("refused".to_string())))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn tpv(t: DateTime<Utc>, lat: f64, lon: f64, speed: f64, track: f64) -> GpsdReport {
        GpsdReport::Tpv(Tpv {
            mode: 3,
            time: Some(t),
            lat: Some(lat),
            lon: Some(lon),
            alt: Some(30.0),
            speed: Some(speed),
            track: Some(track),
            magtrack: None,
        })
    }

    fn home() -> StaticPosition {
        StaticPosition {
            latitude: 3.1,
            longitude: 101.6,
            altitude: 10.0,
        }
    }

    fn acquisition(dir: &TempDir, source: Arc<ScriptedSource>, enabled: bool) -> GpsAcquisition {
        GpsAcquisition::new(enabled, source, dir.path(), home(), AxisNoise::default())
    }

    #[tokio::test]
    async fn test_disabled_returns_zero_fix() {
        let dir = TempDir::new().unwrap();
        let mut gps = acquisition(&dir, ScriptedSource::new(vec![]), false);
        let acquired = gps.acquire_fix_at(t0()).await;
        assert_eq!(acquired.source, FixSource::Disabled);
        assert!(!acquired.is_live());
        assert!(acquired.fix.is_degenerate());
        assert_eq!(acquired.fix.timestamp, t0());
        assert!(!gps.health().is_healthy());
    }

    #[tokio::test]
    async fn test_live_fix_is_smoothed_and_cached() {
        let dir = TempDir::new().unwrap();
        let source = ScriptedSource::new(vec![Ok(Some(tpv(t0(), 3.2, 101.7, 10.0, 90.0)))]);
        let mut gps = acquisition(&dir, source, true);

        let acquired = gps.acquire_fix_at(t0()).await;
        assert!(acquired.is_live());
        let fix = acquired.fix;
        assert_eq!(fix.latitude, 3.2);
        assert_eq!(fix.longitude, 101.7);
        assert_abs_diff_eq!(fix.speed, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fix.course, 90.0, epsilon = 1e-9);
        assert!(gps.health().is_healthy());

        let cached: CachedFix = JsonFile::new(dir.path().join("gps.json")).load();
        assert_eq!(cached.lat, 3.2);
        assert_eq!(cached.alt, 30.0);
    }

    #[tokio::test]
    async fn test_failure_dead_reckons_from_last_fix() {
        let dir = TempDir::new().unwrap();
        let source = ScriptedSource::new(vec![Ok(Some(tpv(t0(), 0.0, 100.0, 20.0, 0.0)))]);
        let mut gps = acquisition(&dir, source, true);
        gps.acquire_fix_at(t0()).await;

        let later = t0() + ChronoDuration::seconds(10);
        let acquired = gps.acquire_fix_at(later).await;
        assert_eq!(acquired.source, FixSource::Fallback(Fallback::FilteredEstimate));
        assert!(!acquired.is_live());
        let fix = acquired.fix;
        assert!(!gps.health().is_healthy());
        assert_eq!(fix.timestamp, later);
        assert!(fix.latitude > 0.0);
        assert_abs_diff_eq!(fix.speed, 20.0, epsilon = 1e-9);
        assert_eq!(fix.altitude, 30.0);
    }

    #[tokio::test]
    async fn test_unhealthy_skips_poll() {
        let dir = TempDir::new().unwrap();
        // Would succeed if it were polled.
        let source = ScriptedSource::new(vec![Ok(Some(tpv(t0(), 5.0, 5.0, 0.0, 0.0)))]);
        let mut gps = acquisition(&dir, source, true);
        gps.health().mark_unhealthy();

        let acquired = gps.acquire_fix_at(t0()).await;
        assert_eq!(acquired.source, FixSource::Fallback(Fallback::StaticConfig));
        assert!(!acquired.is_live());
        assert_eq!(acquired.fix.latitude, home().latitude);
        assert!(!gps.health().is_healthy());
    }

    #[tokio::test]
    async fn test_cached_fix_beats_static_config() {
        let dir = TempDir::new().unwrap();
        JsonFile::new(dir.path().join("gps.json"))
            .save(&CachedFix {
                lat: 1.25,
                lon: 103.8,
                alt: 15.0,
            })
            .unwrap();
        let mut gps = acquisition(&dir, ScriptedSource::new(vec![Ok(None)]), true);

        let acquired = gps.acquire_fix_at(t0()).await;
        assert_eq!(acquired.source, FixSource::Fallback(Fallback::CachedFix));
        let fix = acquired.fix;
        assert_eq!((fix.latitude, fix.longitude, fix.altitude), (1.25, 103.8, 15.0));
        assert_eq!((fix.speed, fix.course), (0.0, 0.0));
        assert!(!gps.health().is_healthy());
    }

    #[tokio::test]
    async fn test_degenerate_cache_falls_through_to_static() {
        let dir = TempDir::new().unwrap();
        JsonFile::new(dir.path().join("gps.json"))
            .save(&CachedFix::default())
            .unwrap();
        let mut gps = acquisition(&dir, ScriptedSource::new(vec![]), true);

        let fix = gps.acquire_fix_at(t0()).await.fix;
        assert_eq!((fix.latitude, fix.longitude), (3.1, 101.6));
    }

    #[tokio::test]
    async fn test_satellites() {
        let dir = TempDir::new().unwrap();
        let sky = GpsdReport::Sky(Sky {
            time: Some(t0()),
            u_sat: Some(8),
            n_sat: Some(14),
        });
        let gps = acquisition(&dir, ScriptedSource::new(vec![Ok(Some(sky))]), true);

        let sats = gps.satellites().await;
        assert_eq!((sats.used, sats.visible), (8, 14));
        assert_eq!(sats.timestamp, t0());

        // Script exhausted: refused, zeros, unhealthy
        let sats = gps.satellites().await;
        assert_eq!((sats.used, sats.visible), (0, 0));
        assert!(!gps.health().is_healthy());
    }

    #[test]
    fn test_report_location_prefers_real_coordinates() {
        let dir = TempDir::new().unwrap();
        let gps = acquisition(&dir, ScriptedSource::new(vec![]), true);

        let live = Fix::stationary(t0(), 2.0, 2.0, 0.0);
        assert_eq!(gps.report_location(Some(&live)), live);

        let zero = Fix::zero(t0());
        let used = gps.report_location(Some(&zero));
        assert_eq!((used.latitude, used.longitude), (3.1, 101.6));
        assert_eq!(gps.report_location(None).altitude, 10.0);
    }

    #[test]
    fn test_static_stand_in_is_stamped_at_call_time() {
        let dir = TempDir::new().unwrap();
        let gps = acquisition(&dir, ScriptedSource::new(vec![]), true);

        let before = Utc::now();
        let used = gps.report_location(Some(&Fix::zero(t0())));
        let after = Utc::now();
        assert!(used.timestamp >= before && used.timestamp <= after);
        assert_eq!((used.speed, used.course), (0.0, 0.0));
    }
}
