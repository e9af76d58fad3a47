use std::fs;
use std::path::{Path, PathBuf};

/// Modulo of the heartbeat tick: one day's worth of seconds, but it is a
/// tick count, not a clock.
pub const TIMER_MODULO: u32 = 86_400;

/// Crash-safe wrapping counter stored as a single decimal value.
///
/// The value is loaded when a scope is acquired and written back when the
/// scope is dropped, so an early return or a failed task still leaves the
/// incremented value on disk.
#[derive(Clone, Debug)]
pub struct PersistentCounter {
    path: PathBuf,
    modulo: u32,
    count: u32,
}

impl PersistentCounter {
    pub fn new(path: impl Into<PathBuf>, modulo: u32) -> Self {
        PersistentCounter {
            path: path.into(),
            modulo: modulo.max(1),
            count: 0,
        }
    }

    /// Load the stored value and open a scope that persists on drop.
    pub fn acquire(&mut self) -> CounterScope<'_> {
        self.count = self.load();
        CounterScope { counter: self }
    }

    /// The value the next scope's `next()` would return, without persisting.
    pub fn peek_next(&self) -> u32 {
        ((self.load() as u64 + 1) % self.modulo as u64) as u32
    }

    fn load(&self) -> u32 {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "Counter {} unreadable ({}), starting from 0",
                    self.path.display(),
                    e
                );
                return 0;
            }
        };

        let first_line = text.lines().next().unwrap_or("").trim();
        match first_line.parse::<u32>() {
            Ok(value) if value < self.modulo => value,
            Ok(value) => {
                log::warn!(
                    "Counter {} holds {} (modulo {}), starting from 0",
                    self.path.display(),
                    value,
                    self.modulo
                );
                0
            }
            Err(_) => {
                log::warn!(
                    "Counter {} holds non-numeric value {:?}, starting from 0",
                    self.path.display(),
                    first_line
                );
                0
            }
        }
    }

    fn save(&self) {
        if let Err(e) = fs::write(&self.path, format!("{}", self.count)) {
            log::error!("Failed to persist counter {}: {}", self.path.display(), e);
        }
    }
}

/// Open load/increment/persist window over a [`PersistentCounter`].
pub struct CounterScope<'a> {
    counter: &'a mut PersistentCounter,
}

impl CounterScope<'_> {
    /// Advance the counter, wrapping at the modulo, and return the new value.
    pub fn next(&mut self) -> u32 {
        let counter = &mut *self.counter;
        counter.count = ((counter.count as u64 + 1) % counter.modulo as u64) as u32;
        counter.count
    }

    pub fn current(&self) -> u32 {
        self.counter.count
    }
}

impl Drop for CounterScope<'_> {
    fn drop(&mut self) {
        self.counter.save();
    }
}

/// Per-report-class sequence number
pub struct Sequence;

impl Sequence {
    pub fn counter(state_dir: &Path, name: &str, modulo: u32) -> PersistentCounter {
        PersistentCounter::new(state_dir.join(format!("{}.tmp", name)), modulo)
    }
}

/// Take the next sequence number for `name` and persist it immediately.
pub fn next_sequence(state_dir: &Path, name: &str, modulo: u32) -> u32 {
    let mut counter = Sequence::counter(state_dir, name, modulo);
    let mut scope = counter.acquire();
    scope.next()
}

/// Free-running heartbeat index used for "every Nth tick" scheduling.
pub struct Timer {
    counter: PersistentCounter,
}

impl Timer {
    pub fn new(state_dir: &Path) -> Self {
        Timer {
            counter: PersistentCounter::new(state_dir.join("timer.tmp"), TIMER_MODULO),
        }
    }

    pub fn next_tick(&mut self) -> u32 {
        let mut scope = self.counter.acquire();
        scope.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counter_wraparound_persists_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.tmp");
        fs::write(&path, "99").unwrap();

        let mut counter = PersistentCounter::new(&path, 100);
        {
            let mut scope = counter.acquire();
            assert_eq!(scope.next(), 0);
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn test_counter_increments_from_stored_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.tmp");
        fs::write(&path, "10\n").unwrap();

        let mut counter = PersistentCounter::new(&path, 1000);
        {
            let mut scope = counter.acquire();
            assert_eq!(scope.next(), 11);
            assert_eq!(scope.next(), 12);
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "12");
    }

    #[test]
    fn test_counter_corrupt_storage_loads_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.tmp");
        fs::write(&path, "not a number").unwrap();

        let mut counter = PersistentCounter::new(&path, 100);
        let scope = counter.acquire();
        assert_eq!(scope.current(), 0);
    }

    #[test]
    fn test_counter_missing_file_loads_zero() {
        let dir = TempDir::new().unwrap();
        let mut counter = PersistentCounter::new(dir.path().join("absent.tmp"), 100);
        let mut scope = counter.acquire();
        assert_eq!(scope.current(), 0);
        assert_eq!(scope.next(), 1);
    }

    #[test]
    fn test_counter_out_of_range_loads_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seq.tmp");
        fs::write(&path, "250").unwrap();

        let mut counter = PersistentCounter::new(&path, 100);
        let scope = counter.acquire();
        assert_eq!(scope.current(), 0);
    }

    #[test]
    fn test_counter_write_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory in place of the file makes both read and write fail.
        let path = dir.path().join("blocked");
        fs::create_dir(&path).unwrap();

        let mut counter = PersistentCounter::new(&path, 10);
        let mut scope = counter.acquire();
        assert_eq!(scope.next(), 1);
        drop(scope);
        assert!(path.is_dir());
    }

    #[test]
    fn test_timer_survives_restart() {
        let dir = TempDir::new().unwrap();
        let mut timer = Timer::new(dir.path());
        assert_eq!(timer.next_tick(), 1);
        assert_eq!(timer.next_tick(), 2);

        let mut restarted = Timer::new(dir.path());
        assert_eq!(restarted.next_tick(), 3);
    }

    #[test]
    fn test_timer_wraps_daily() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("timer.tmp"), "86399").unwrap();
        let mut timer = Timer::new(dir.path());
        assert_eq!(timer.next_tick(), 0);
    }

    #[test]
    fn test_next_sequence_uses_named_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(next_sequence(dir.path(), "telem_sequence", 1000), 1);
        assert_eq!(next_sequence(dir.path(), "telem_sequence", 1000), 2);
        assert_eq!(next_sequence(dir.path(), "msg_sequence", 100_000), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("telem_sequence.tmp")).unwrap(),
            "2"
        );
    }

    #[test]
    fn test_peek_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("msg_sequence.tmp");
        fs::write(&path, "41").unwrap();

        let mut counter = PersistentCounter::new(&path, 100_000);
        assert_eq!(counter.peek_next(), 42);
        assert_eq!(counter.peek_next(), 42);
        assert_eq!(fs::read_to_string(&path).unwrap(), "41");

        assert_eq!(counter.acquire().next(), 42);
        assert_eq!(fs::read_to_string(&path).unwrap(), "42");
    }
}
