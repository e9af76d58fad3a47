use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::counter::{next_sequence, Timer};
use crate::error::BResult;
use crate::geo::maidenhead_grid;
use crate::health_monitor::HealthMonitor;
use crate::report::{HeaderReport, PositionReport, Report, StatusReport, TelemetryReport};
use crate::scheduled::ScheduledMessages;
use crate::sensors::GpsAcquisition;
use crate::session::{SessionControl, SessionEnd};
use crate::sink::ReportSink;
use crate::smart_beacon::SmartBeacon;
use crate::storage::JsonFile;
use crate::system_stats::HostMetrics;
use crate::types::Fix;

pub const LOOP_INTERVAL: Duration = Duration::from_millis(500);
pub const TEMP_SAMPLE_TICKS: u32 = 20;
pub const POSITION_TICKS: u32 = 1200;
pub const HEADER_TICKS: u32 = 14400;
pub const TELEM_SEQUENCE: &str = "telem_sequence";
pub const TELEM_SEQUENCE_MODULO: u32 = 1000;

/// Work that may fall due on a tick, in dispatch order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Position,
    Header,
    Telemetry,
    ScheduledMessages,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::Position => "position",
            Task::Header => "header",
            Task::Telemetry => "telemetry",
            Task::ScheduledMessages => "scheduled_messages",
        }
    }
}

/// Owns all per-session state and drives it from the persistent tick.
pub struct Scheduler {
    from_call: String,
    telemetry_interval: u32,
    gpsd_enabled: bool,
    smartbeaconing_enabled: bool,
    state_dir: PathBuf,
    timer: Timer,
    trigger: SmartBeacon,
    gps: GpsAcquisition,
    metrics: Box<dyn HostMetrics>,
    scheduled: ScheduledMessages,
    sink: Arc<dyn ReportSink>,
    last_status: JsonFile<Option<StatusReport>>,
}

impl Scheduler {
    pub fn new(
        cfg: &Config,
        gps: GpsAcquisition,
        metrics: Box<dyn HostMetrics>,
        scheduled: ScheduledMessages,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Scheduler {
            from_call: cfg.from_call(),
            telemetry_interval: cfg.sleep,
            gpsd_enabled: cfg.gpsd_enabled,
            smartbeaconing_enabled: cfg.smartbeaconing_enabled,
            state_dir: cfg.state_dir.clone(),
            timer: Timer::new(&cfg.state_dir),
            trigger: SmartBeacon::new(cfg.thresholds()),
            gps,
            metrics,
            scheduled,
            sink,
            last_status: JsonFile::new(cfg.state_dir.join("status.json")),
        }
    }

    pub fn from_call(&self) -> &str {
        &self.from_call
    }

    pub fn gpsd_enabled(&self) -> bool {
        self.gpsd_enabled
    }

    pub fn sink(&self) -> Arc<dyn ReportSink> {
        Arc::clone(&self.sink)
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        self.gps.health_monitor()
    }

    /// Loop until a reload or shutdown is requested. Only fatal transport
    /// errors come back as `Err`.
    pub async fn run(&mut self, control: &SessionControl) -> BResult<SessionEnd> {
        loop {
            let tick = self.timer.next_tick();
            if let Some(end) = control.pending() {
                log::info!("Leaving scheduler loop at tick {}: {:?}", tick, end);
                return Ok(end);
            }
            self.run_iteration(tick).await?;
            sleep(LOOP_INTERVAL).await;
        }
    }

    /// One pass over the due tasks for `tick`. Returns whether anything was
    /// sent.
    pub async fn run_iteration(&mut self, tick: u32) -> BResult<bool> {
        if tick % TEMP_SAMPLE_TICKS == 0 {
            self.metrics.check_temp();
        }

        let acquired = if self.gpsd_enabled {
            Some(self.gps.acquire_fix().await)
        } else {
            None
        };
        let fix = acquired.map(|a| a.fix);
        let live = acquired.is_some_and(|a| a.is_live());

        let mut sent_any = false;
        for task in self.due_tasks(tick, fix.as_ref()) {
            let result = self.execute(task, fix.as_ref(), live).await;
            sent_any |= contain(task.name(), result)?;
        }

        if sent_any {
            let result = self.send_status(fix.as_ref()).await;
            contain("status", result)?;
        }
        Ok(sent_any)
    }

    /// Tasks due on `tick`, in dispatch order. Consults the SmartBeaconing
    /// trigger, which records a report when it fires.
    pub fn due_tasks(&mut self, tick: u32, fix: Option<&Fix>) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(4);

        let adaptive = self.gpsd_enabled
            && self.smartbeaconing_enabled
            && fix.is_some_and(|f| self.trigger.should_report(f));
        if adaptive || tick % POSITION_TICKS == 1 {
            tasks.push(Task::Position);
        }
        if tick % HEADER_TICKS == 1 {
            tasks.push(Task::Header);
        }
        if self.telemetry_interval != 0 && tick % self.telemetry_interval == 1 {
            tasks.push(Task::Telemetry);
        }
        tasks.push(Task::ScheduledMessages);
        tasks
    }

    /// `live` is true only when gpsd delivered `fix` on this tick.
    async fn execute(&mut self, task: Task, fix: Option<&Fix>, live: bool) -> BResult<bool> {
        match task {
            Task::Position => {
                let report = Report::Position(PositionReport {
                    from: self.from_call.clone(),
                    fix: self.gps.report_location(fix),
                    live,
                });
                self.sink.send(&report).await?;
                Ok(true)
            }
            Task::Header => {
                let report = Report::Header(HeaderReport::new(&self.from_call, self.gpsd_enabled));
                self.sink.send(&report).await?;
                Ok(true)
            }
            Task::Telemetry => {
                let sequence = next_sequence(&self.state_dir, TELEM_SEQUENCE, TELEM_SEQUENCE_MODULO);
                let satellites_used = if self.gpsd_enabled {
                    Some(self.gps.satellites().await.used)
                } else {
                    None
                };
                let report = Report::Telemetry(TelemetryReport {
                    from: self.from_call.clone(),
                    sequence,
                    cpu_temp: self.metrics.avg_temp(),
                    cpu_load: self.metrics.cpu_load(),
                    memory_used: self.metrics.memory_used(),
                    storage_used: self.metrics.storage_used(),
                    satellites_used,
                });
                self.sink.send(&report).await?;
                Ok(true)
            }
            Task::ScheduledMessages => self.send_scheduled(fix).await,
        }
    }

    async fn send_scheduled(&mut self, fix: Option<&Fix>) -> BResult<bool> {
        let location = self.gps.report_location(fix);
        let mut sent = false;
        for message in self.scheduled.due(Utc::now(), &location) {
            let report = message.report(self.scheduled.peek_sequence());
            match self.sink.send(&report).await {
                Ok(()) => {
                    self.scheduled.mark_sent(&message);
                    sent = true;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::error!(
                    "Error sending {} from {}: {}",
                    message.net.name,
                    message.source,
                    e
                ),
            }
        }
        Ok(sent)
    }

    /// Trailing status; skipped when identical to the last one sent.
    async fn send_status(&mut self, fix: Option<&Fix>) -> BResult<bool> {
        let location = self.gps.report_location(fix);
        let satellites = if self.gpsd_enabled {
            Some(self.gps.satellites().await)
        } else {
            None
        };
        let status = StatusReport::new(
            &self.from_call,
            Utc::now(),
            maidenhead_grid(location.latitude, location.longitude, 6),
            self.metrics.uptime_secs(),
            satellites,
        );

        if self.last_status.load().as_ref() == Some(&status) {
            log::debug!("Status unchanged, not sending");
            return Ok(false);
        }
        self.sink.send(&Report::Status(status.clone())).await?;
        self.last_status.save_or_log(&Some(status));
        Ok(true)
    }
}

/// Keep a task failure from reaching siblings; only fatal errors escape.
fn contain(task: &str, result: BResult<bool>) -> BResult<bool> {
    match result {
        Ok(sent) => Ok(sent),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::error!("Error executing task {}: {}", task, e);
            Ok(false)
        }
    }
}
