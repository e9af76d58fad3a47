pub mod config;
pub mod counter;
pub mod error;
pub mod filters;
pub mod geo;
pub mod gpsd;
pub mod health_monitor;
pub mod reconnect;
pub mod report;
pub mod scheduled;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod sink;
pub mod smart_beacon;
pub mod storage;
pub mod system_stats;
pub mod types;

/// Name carried in check-in messages
pub const APP_NAME: &str = "SmartBeacon";
