use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Reconnect bookkeeping for one uplink: bounded attempts with a doubling,
/// capped delay between them.
#[derive(Clone, Debug)]
pub struct ReconnectState {
    pub name: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(name: &str, max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        ReconnectState {
            name: name.to_string(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            current_delay: base_delay,
        }
    }

    /// Count a failed attempt. Returns how long to wait before the next one,
    /// or `None` once the attempts are used up.
    pub fn record_failed_attempt(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if !self.can_retry() {
            log::error!(
                "{}: giving up after {} attempt(s)",
                self.name,
                self.attempts
            );
            return None;
        }

        let delay = self.current_delay;
        self.current_delay = (self.current_delay * 2).min(self.max_delay);
        log::warn!(
            "{}: attempt {}/{} failed, next retry in {:.1}s",
            self.name,
            self.attempts,
            self.max_attempts,
            delay.as_secs_f64()
        );
        Some(delay)
    }

    pub fn record_success(&mut self) {
        if self.attempts > 0 {
            log::info!(
                "{}: connected after {} failed attempt(s)",
                self.name,
                self.attempts
            );
        }
        self.attempts = 0;
        self.current_delay = self.base_delay;
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
