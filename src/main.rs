use std::path::Path;

use anyhow::Result;
use clap::Parser;

use smart_beacon_rs::config::{overlay_env_file, Config, ENV_FILE};
use smart_beacon_rs::session::{open_session, SessionControl, SessionEnd};
use smart_beacon_rs::sink::{LogNotifier, Notifier};
use smart_beacon_rs::APP_NAME;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let control = SessionControl::new();
    spawn_signal_handlers(control.clone())?;
    let notifier = LogNotifier;

    loop {
        // Re-read for every session so SIGHUP picks up edits to the env file.
        if let Err(e) = overlay_env_file(Path::new(ENV_FILE)) {
            log::error!("Ignoring env file: {}", e);
        }
        let cfg = Config::parse();
        control.clear_reload();

        let mut scheduler = match open_session(&cfg).await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                log::error!("Session start failed: {}", e);
                std::process::exit(e.exit_code());
            }
        };

        let health_task = if scheduler.gpsd_enabled() {
            Some(tokio::spawn(scheduler.health_monitor().run()))
        } else {
            None
        };

        notifier
            .notify(&format!(
                "{} {} started as {} (sink: {:?})",
                APP_NAME,
                env!("CARGO_PKG_VERSION"),
                scheduler.from_call(),
                cfg.sink
            ))
            .await;

        let outcome = scheduler.run(&control).await;

        if let Some(task) = health_task {
            task.abort();
        }
        scheduler.sink().close().await;

        match outcome {
            Ok(SessionEnd::Reload) => {
                notifier.notify(&format!("{} reloading configuration", APP_NAME)).await;
            }
            Ok(SessionEnd::Shutdown) => {
                notifier.notify(&format!("{} stopped", APP_NAME)).await;
                return Ok(());
            }
            Err(e) => {
                log::error!("Scheduler stopped: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }
}

#[cfg(unix)]
fn spawn_signal_handlers(control: SessionControl) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = hangup.recv() => {
                    log::info!("SIGHUP received, reload requested");
                    control.request_reload();
                }
                Some(()) = terminate.recv() => {
                    log::info!("SIGTERM received, shutting down");
                    control.request_shutdown();
                }
                Ok(()) = tokio::signal::ctrl_c() => {
                    log::info!("Interrupt received, shutting down");
                    control.request_shutdown();
                }
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(control: SessionControl) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down");
            control.request_shutdown();
        }
    });
    Ok(())
}
