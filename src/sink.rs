use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::error::{BResult, BeaconError};
use crate::reconnect::{ReconnectState, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use crate::report::Report;

/// Delivers reports somewhere.
///
/// Only [`BeaconError::TransportExhausted`] is expected to stop the daemon;
/// anything else is logged by the scheduler and the next report is tried.
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, report: &Report) -> BResult<()>;

    /// Release the transport at the end of a session.
    async fn close(&self) {}
}

/// Writes every report to the log as one JSON line.
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, report: &Report) -> BResult<()> {
        report.validate()?;
        log::info!("[{}] {}", report.kind(), report.to_json_line()?);
        Ok(())
    }
}

/// Newline-delimited JSON over one long-lived TCP connection.
///
/// Connection failures are retried with backoff; running out of attempts is
/// fatal.
pub struct TcpLineSink {
    endpoint: String,
    connection: Mutex<Option<BufWriter<TcpStream>>>,
    max_attempts: u32,
    base_delay: Duration,
    connect_timeout: Duration,
}

impl TcpLineSink {
    pub fn new(host: &str, port: u16) -> Self {
        TcpLineSink {
            endpoint: format!("{}:{}", host, port),
            connection: Mutex::new(None),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connect eagerly so a dead uplink is noticed at startup.
    pub async fn connect(&self) -> BResult<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            *connection = Some(BufWriter::new(self.open().await?));
        }
        Ok(())
    }

    async fn open(&self) -> BResult<TcpStream> {
        log::info!("Connecting to {}", self.endpoint);
        let mut state = ReconnectState::new(
            &self.endpoint,
            self.max_attempts,
            self.base_delay,
            DEFAULT_MAX_DELAY,
        );

        loop {
            match timeout(self.connect_timeout, TcpStream::connect(&self.endpoint)).await {
                Ok(Ok(stream)) => {
                    state.record_success();
                    log::info!("Connected to {}", self.endpoint);
                    return Ok(stream);
                }
                Ok(Err(e)) => log::warn!("Connection to {} failed: {}", self.endpoint, e),
                Err(_) => log::warn!("Connection to {} timed out", self.endpoint),
            }

            match state.record_failed_attempt() {
                Some(delay) => sleep(delay).await,
                None => {
                    log::error!("Connection error, giving up on {}", self.endpoint);
                    return Err(BeaconError::TransportExhausted {
                        endpoint: self.endpoint.clone(),
                        attempts: state.attempts,
                    });
                }
            }
        }
    }
}

async fn write_line(writer: &mut BufWriter<TcpStream>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[async_trait]
impl ReportSink for TcpLineSink {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn send(&self, report: &Report) -> BResult<()> {
        report.validate()?;
        let line = report.to_json_line()?;

        let mut connection = self.connection.lock().await;
        if let Some(writer) = connection.as_mut() {
            match write_line(writer, &line).await {
                Ok(()) => {
                    log::info!("[{}] {}", report.kind(), line);
                    return Ok(());
                }
                Err(e) => {
                    log::error!("Connection error at {}: {}", report.kind(), e);
                    *connection = None;
                }
            }
        }

        // One fresh connection per report; a second write failure is not
        // retried here.
        let writer = connection.insert(BufWriter::new(self.open().await?));
        match write_line(writer, &line).await {
            Ok(()) => {
                log::info!("[{}] {}", report.kind(), line);
                Ok(())
            }
            Err(e) => {
                *connection = None;
                Err(BeaconError::Transport(format!(
                    "{} to {}: {}",
                    report.kind(),
                    self.endpoint,
                    e
                )))
            }
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.connection.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                log::debug!("Closing {}: {}", self.endpoint, e);
            }
        }
    }
}

/// Human-facing lifecycle notices (startup, reload, shutdown).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        log::info!("{}", message);
    }
}
