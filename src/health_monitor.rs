use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use crate::gpsd::{PositionSource, ReportClass};

/// Nominal period of the background gpsd probe
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// "gpsd is reachable" flag, shared between the acquisition path and the
/// background probe.
///
/// Readers may see a value up to one probe period old.
#[derive(Debug)]
pub struct GpsHealth {
    healthy: AtomicBool,
}

impl GpsHealth {
    pub fn new(healthy: bool) -> Self {
        GpsHealth {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Returns true when this call changed the flag.
    pub fn mark_healthy(&self) -> bool {
        !self.healthy.swap(true, Ordering::Relaxed)
    }

    /// Returns true when this call changed the flag.
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::Relaxed)
    }
}

impl Default for GpsHealth {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Periodic gpsd liveness probe; the only path that restores health after a
/// downgrade.
#[derive(Clone)]
pub struct HealthMonitor {
    health: Arc<GpsHealth>,
    source: Arc<dyn PositionSource>,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(health: Arc<GpsHealth>, source: Arc<dyn PositionSource>) -> Self {
        HealthMonitor {
            health,
            source,
            check_interval: HEALTH_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Probe once and update the flag. Returns the new health.
    pub async fn check_once(&self) -> bool {
        let source = Arc::clone(&self.source);
        let outcome = tokio::task::spawn_blocking(move || source.poll(ReportClass::Version)).await;

        match outcome {
            Ok(Ok(Some(_))) => {
                if self.health.mark_healthy() {
                    log::info!("GPSD connection restored.");
                }
                true
            }
            Ok(Ok(None)) => {
                if self.health.mark_unhealthy() {
                    log::warn!("GPSD connection lost.");
                }
                false
            }
            Ok(Err(e)) => {
                if self.health.mark_unhealthy() {
                    log::warn!("GPSD connection lost: {}", e);
                }
                false
            }
            Err(e) => {
                if self.health.mark_unhealthy() {
                    log::warn!("GPSD health probe aborted: {}", e);
                }
                false
            }
        }
    }

    /// Run forever at a fixed cadence, subtracting the probe time from the
    /// sleep. Cancel by aborting the task.
    pub async fn run(self) {
        loop {
            let started = Instant::now();
            self.check_once().await;
            let elapsed = started.elapsed();
            sleep(self.check_interval.saturating_sub(elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BResult, BeaconError};
    use crate::gpsd::{GpsdReport, Version};
    use std::sync::atomic::AtomicUsize;

    struct ScriptedSource {
        up: AtomicBool,
        polls: AtomicUsize,
        delay: Duration,
    }

    impl PositionSource for ScriptedSource {
        fn poll(&self, class: ReportClass) -> BResult<Option<GpsdReport>> {
            assert_eq!(class, ReportClass::Version);
            self.polls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.up.load(Ordering::SeqCst) {
                Ok(Some(GpsdReport::Version(Version {
                    release: "3.25".to_string(),
                })))
            } else {
                Err(BeaconError::GpsdUnavailable("refused".to_string()))
            }
        }
    }

    fn scripted(up: bool) -> Arc<ScriptedSource> {
        slow_scripted(up, Duration::ZERO)
    }

    fn slow_scripted(up: bool, delay: Duration) -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource {
            up: AtomicBool::new(up),
            polls: AtomicUsize::new(0),
            delay,
        })
    }

    #[test]
    fn test_transitions_reported_once() {
        let health = GpsHealth::new(true);
        assert!(!health.mark_healthy());
        assert!(health.mark_unhealthy());
        assert!(!health.mark_unhealthy());
        assert!(!health.is_healthy());
        assert!(health.mark_healthy());
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn test_probe_restores_and_degrades_health() {
        let health = Arc::new(GpsHealth::new(false));
        let source = scripted(true);
        let monitor = HealthMonitor::new(Arc::clone(&health), source.clone());

        assert!(monitor.check_once().await);
        assert!(health.is_healthy());

        source.up.store(false, Ordering::SeqCst);
        assert!(!monitor.check_once().await);
        assert!(!health.is_healthy());
    }

    #[tokio::test]
    async fn test_run_loop_keeps_cadence_and_aborts() {
        let health = Arc::new(GpsHealth::new(false));
        let source = scripted(true);
        let monitor = HealthMonitor::new(Arc::clone(&health), source.clone())
            .with_interval(Duration::from_millis(20));

        let handle = tokio::spawn(monitor.run());
        sleep(Duration::from_millis(110)).await;
        handle.abort();
        let _ = handle.await;

        assert!(health.is_healthy());
        assert!(source.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_slow_poll_time_is_taken_out_of_the_sleep() {
        let health = Arc::new(GpsHealth::new(false));
        let source = slow_scripted(true, Duration::from_millis(15));
        let monitor = HealthMonitor::new(Arc::clone(&health), source.clone())
            .with_interval(Duration::from_millis(20));

        let handle = tokio::spawn(monitor.run());
        sleep(Duration::from_millis(400)).await;
        handle.abort();
        let _ = handle.await;

        // One poll per 20 ms gives about 20; sleeping a full interval after
        // each 15 ms poll would give about 11.
        let polls = source.polls.load(Ordering::SeqCst);
        assert!((15..=21).contains(&polls), "polls = {}", polls);
    }
}
