use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sysinfo::{Components, Disks, System};

use crate::error::{BResult, BeaconError};

/// Window over which temperature samples are averaged
pub const TEMP_WINDOW: Duration = Duration::from_secs(600);

/// Host health numbers carried by telemetry and status reports.
pub trait HostMetrics: Send {
    /// 5-minute load average per core, x 100 000
    fn cpu_load(&mut self) -> u64;
    /// bytes
    fn memory_used(&mut self) -> u64;
    /// bytes used on the root filesystem
    fn storage_used(&mut self) -> u64;
    /// Record one temperature sample into the averaging window.
    fn check_temp(&mut self);
    /// deci-degrees Celsius, averaged over the window when samples exist
    fn avg_temp(&mut self) -> i64;
    fn uptime_secs(&mut self) -> u64;
}

/// Values refetched once they are older than their TTL. A failed fetch is
/// logged and cached as 0.
#[derive(Debug, Default)]
struct TtlCache {
    entries: HashMap<&'static str, (u64, Instant)>,
}

impl TtlCache {
    fn get_or_fetch<F>(&mut self, key: &'static str, ttl: Duration, now: Instant, fetch: F) -> u64
    where
        F: FnOnce() -> BResult<u64>,
    {
        if let Some(&(value, at)) = self.entries.get(key) {
            if now.duration_since(at) < ttl {
                return value;
            }
        }
        let value = fetch().unwrap_or_else(|e| {
            log::error!("Unexpected error in {}: {}", key, e);
            0
        });
        self.entries.insert(key, (value, now));
        value
    }
}

/// Temperature samples younger than [`TEMP_WINDOW`].
#[derive(Debug, Default)]
struct TemperatureWindow {
    samples: VecDeque<(Instant, f64)>,
}

impl TemperatureWindow {
    fn record(&mut self, at: Instant, celsius: f64) {
        self.samples.push_back((at, celsius));
        while let Some(&(oldest, _)) = self.samples.front() {
            if at.duration_since(oldest) > TEMP_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, t)| t).sum();
        Some(sum / self.samples.len() as f64)
    }
}

/// Host metrics read through `sysinfo`, each cached for a short TTL.
pub struct SysHostMetrics {
    system: System,
    mount: PathBuf,
    cache: TtlCache,
    temperatures: TemperatureWindow,
}

impl SysHostMetrics {
    pub fn new() -> Self {
        Self::for_mount("/")
    }

    /// Report storage for the filesystem holding `mount`.
    pub fn for_mount(mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        SysHostMetrics {
            system,
            mount: mount.into(),
            cache: TtlCache::default(),
            temperatures: TemperatureWindow::default(),
        }
    }

    fn fetch_memory_used(system: &mut System) -> BResult<u64> {
        system.refresh_memory();
        if system.total_memory() == 0 {
            return Err(BeaconError::Metrics("no memory information".to_string()));
        }
        Ok(system.used_memory())
    }

    fn fetch_storage_used(mount: &Path) -> BResult<u64> {
        let disks = Disks::new_with_refreshed_list();
        let usage: Vec<DiskUsage> = disks
            .list()
            .iter()
            .map(|disk| DiskUsage {
                mount_point: disk.mount_point().to_path_buf(),
                total: disk.total_space(),
                available: disk.available_space(),
            })
            .collect();
        used_on_mount(&usage, mount)
            .ok_or_else(|| BeaconError::Metrics(format!("no disk mounted at {}", mount.display())))
    }

    fn fetch_temperature() -> BResult<f64> {
        let components = Components::new_with_refreshed_list();
        let readings: Vec<(&str, f32)> = components
            .list()
            .iter()
            .map(|c| (c.label(), c.temperature()))
            .collect();
        cpu_temperature(&readings)
            .map(f64::from)
            .ok_or_else(|| BeaconError::Metrics("no temperature sensor".to_string()))
    }
}

impl Default for SysHostMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics for SysHostMetrics {
    fn cpu_load(&mut self) -> u64 {
        let cores = self.system.cpus().len();
        self.cache.get_or_fetch("cpu_load", Duration::from_secs(5), Instant::now(), || {
            Ok(load_per_core(System::load_average().five, cores))
        })
    }

    fn memory_used(&mut self) -> u64 {
        let system = &mut self.system;
        self.cache.get_or_fetch("memory_used", Duration::from_secs(5), Instant::now(), || {
            Self::fetch_memory_used(system)
        })
    }

    fn storage_used(&mut self) -> u64 {
        let mount = &self.mount;
        self.cache.get_or_fetch("storage_used", Duration::from_secs(60), Instant::now(), || {
            Self::fetch_storage_used(mount)
        })
    }

    fn check_temp(&mut self) {
        // A board without a sensor simply never fills the window.
        if let Ok(celsius) = Self::fetch_temperature() {
            self.temperatures.record(Instant::now(), celsius);
        }
    }

    fn avg_temp(&mut self) -> i64 {
        if let Some(average) = self.temperatures.average() {
            return (average * 10.0) as i64;
        }
        self.cache.get_or_fetch("avg_temp", Duration::from_secs(5), Instant::now(), || {
            Self::fetch_temperature().map(|t| (t * 10.0).max(0.0) as u64)
        }) as i64
    }

    fn uptime_secs(&mut self) -> u64 {
        self.cache.get_or_fetch("uptime", Duration::from_secs(60), Instant::now(), || {
            Ok(System::uptime())
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
struct DiskUsage {
    mount_point: PathBuf,
    total: u64,
    available: u64,
}

/// Load average per core, x 100 000.
fn load_per_core(load: f64, cores: usize) -> u64 {
    (load / cores.max(1) as f64 * 100_000.0) as u64
}

/// Used bytes on the disk with the longest mount point containing `mount`.
fn used_on_mount(disks: &[DiskUsage], mount: &Path) -> Option<u64> {
    disks
        .iter()
        .filter(|d| mount.starts_with(&d.mount_point))
        .max_by_key(|d| d.mount_point.components().count())
        .map(|d| d.total.saturating_sub(d.available))
}

/// The CPU sensor when one is labelled so, else the first sensor.
fn cpu_temperature(readings: &[(&str, f32)]) -> Option<f32> {
    readings
        .iter()
        .find(|(label, _)| label.to_ascii_lowercase().contains("cpu"))
        .or_else(|| readings.first())
        .map(|&(_, t)| t)
        .filter(|t| t.is_finite())
}
