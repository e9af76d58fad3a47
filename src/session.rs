use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{Config, SinkKind};
use crate::error::BResult;
use crate::scheduled::ScheduledMessages;
use crate::scheduler::Scheduler;
use crate::sensors::{resolve_static_position, GpsAcquisition};
use crate::sink::{LogSink, ReportSink, TcpLineSink};
use crate::system_stats::SysHostMetrics;
use crate::types::StaticPosition;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Configuration reload requested (SIGHUP); a new session follows
    Reload,
    /// Ctrl-C or SIGTERM
    Shutdown,
}

/// Stop requests raised by signal handlers, observed by the scheduler at the
/// top of each iteration.
#[derive(Clone, Debug, Default)]
pub struct SessionControl {
    reload: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Shutdown wins over a pending reload.
    pub fn pending(&self) -> Option<SessionEnd> {
        if self.shutdown.load(Ordering::SeqCst) {
            Some(SessionEnd::Shutdown)
        } else if self.reload.load(Ordering::SeqCst) {
            Some(SessionEnd::Reload)
        } else {
            None
        }
    }

    /// Called when a new session starts.
    pub fn clear_reload(&self) {
        self.reload.store(false, Ordering::SeqCst);
    }
}

/// Build the report sink selected in the configuration. The TCP sink
/// connects eagerly, so an unreachable server fails the session start.
pub async fn open_sink(cfg: &Config) -> BResult<Arc<dyn ReportSink>> {
    match cfg.sink {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        SinkKind::Tcp => {
            let sink = TcpLineSink::new(&cfg.server, cfg.port);
            log::info!("Connecting to report server {} as {}", sink.endpoint(), cfg.from_call());
            sink.connect().await?;
            Ok(Arc::new(sink))
        }
    }
}

/// Everything one configuration generation needs: static position, sensor
/// acquisition, sink and scheduler state, all built fresh.
pub async fn open_session(cfg: &Config) -> BResult<Scheduler> {
    cfg.validate()?;
    if let Err(e) = std::fs::create_dir_all(&cfg.state_dir) {
        log::error!("Cannot create state dir {}: {}", cfg.state_dir.display(), e);
    }

    let static_position = resolve_static_position(cfg).await;
    let mut gps = GpsAcquisition::from_config(cfg, static_position);
    if gps.is_enabled() {
        let acquired = gps.acquire_fix().await;
        if acquired.is_live() {
            let fix = acquired.fix;
            gps.set_static_position(StaticPosition {
                latitude: fix.latitude,
                longitude: fix.longitude,
                altitude: fix.altitude,
            });
        }
    }

    let sink = open_sink(cfg).await?;
    Ok(Scheduler::new(
        cfg,
        gps,
        Box::new(SysHostMetrics::new()),
        ScheduledMessages::from_config(cfg),
        sink,
    ))
}
