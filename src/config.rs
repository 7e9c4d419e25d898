//! Logger configuration and runtime toggles.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;

use crate::affinity::{Affinity, SystemAffinity};
use crate::clock::{Clock, SystemClock};
use crate::stream::Destination;
use crate::transform::Transform;

/// Presence enables the transform hook for the process-wide logger.
pub const TRANSFORM_ENV: &str = "BGLOG_TRANSFORM";
/// Presence makes waits sleep instead of yielding.
pub const SLEEP_WAIT_ENV: &str = "BGLOG_SLEEP_WAIT";
/// Presence moves the consumer thread to the last CPU.
pub const JUNK_CORE_ENV: &str = "BGLOG_JUNK_CORE";
/// Slot count of the process-wide logger.
pub const CAPACITY_ENV: &str = "BGLOG_CAPACITY";

/// Slots in a channel unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 256;
/// Consumer sleep when the channel is empty; one microsecond short of 10ms so
/// it stands out in a syscall trace.
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_micros(10 * 1000 - 1);
/// Producer and drain wait when sleep-based waiting is on.
pub const DEFAULT_BACKOFF_SLEEP: Duration = Duration::from_millis(100);
/// Warnings the consumer prints before going quiet.
pub const DEFAULT_WARNING_LIMIT: u32 = 100;

lazy_static! {
    static ref TRANSFORM_ENABLED_BY_ENV: bool = env::var_os(TRANSFORM_ENV).is_some();
}

/// Whether the transform hook was switched on through the environment.
///
/// Read once per process; later changes to the environment are ignored.
pub fn transform_enabled_by_env() -> bool {
    *TRANSFORM_ENABLED_BY_ENV
}

/// Switches that can be flipped while the logger is running.
#[derive(Debug)]
pub struct Toggles {
    background: AtomicBool,
    yield_via_sleep: AtomicBool,
    log_on_junk: AtomicBool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            background: AtomicBool::new(true),
            yield_via_sleep: AtomicBool::new(false),
            log_on_junk: AtomicBool::new(false),
        }
    }
}

impl Toggles {
    /// Toggles seeded from `BGLOG_SLEEP_WAIT` and `BGLOG_JUNK_CORE`.
    pub fn from_env() -> Self {
        let toggles = Self::default();
        toggles.set_yield_via_sleep(env::var_os(SLEEP_WAIT_ENV).is_some());
        toggles.set_log_on_junk(env::var_os(JUNK_CORE_ENV).is_some());
        toggles
    }

    /// When off, submissions are rendered and written on the calling thread.
    pub fn background(&self) -> bool {
        self.background.load(Ordering::Relaxed)
    }

    pub fn set_background(&self, on: bool) {
        self.background.store(on, Ordering::Relaxed);
    }

    /// Sleep instead of yielding while waiting for room or for a drain.
    /// Meant for test and CI machines where spinning wastes shared cores.
    pub fn yield_via_sleep(&self) -> bool {
        self.yield_via_sleep.load(Ordering::Relaxed)
    }

    pub fn set_yield_via_sleep(&self, on: bool) {
        self.yield_via_sleep.store(on, Ordering::Relaxed);
    }

    /// Move the consumer thread to the last CPU on its next loop iteration.
    pub fn log_on_junk(&self) -> bool {
        self.log_on_junk.load(Ordering::Relaxed)
    }

    pub fn set_log_on_junk(&self, on: bool) {
        self.log_on_junk.store(on, Ordering::Relaxed);
    }
}

/// Construction parameters of a [`BackgroundLogger`](crate::BackgroundLogger).
#[derive(Clone)]
pub struct LoggerConfig {
    pub capacity: usize,
    pub idle_sleep: Duration,
    pub backoff_sleep: Duration,
    pub warning_limit: u32,
    pub fault_stream: Destination,
    /// Applied to every rendered record when set.
    pub transform: Option<Arc<dyn Transform>>,
    pub clock: Arc<dyn Clock>,
    pub affinity: Arc<dyn Affinity>,
    pub toggles: Arc<Toggles>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            backoff_sleep: DEFAULT_BACKOFF_SLEEP,
            warning_limit: DEFAULT_WARNING_LIMIT,
            fault_stream: Destination::Stderr,
            transform: None,
            clock: Arc::new(SystemClock),
            affinity: Arc::new(SystemAffinity),
            toggles: Arc::new(Toggles::default()),
        }
    }
}

impl LoggerConfig {
    /// Defaults overridden by the `BGLOG_*` environment variables.
    ///
    /// `BGLOG_TRANSFORM` is not applied here: it selects whichever transform
    /// the application installed for the process-wide logger. An unparsable
    /// `BGLOG_CAPACITY` is ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self { toggles: Arc::new(Toggles::from_env()), ..Self::default() };
        if let Some(raw) = env::var_os(CAPACITY_ENV) {
            match raw.to_str().and_then(|s| s.trim().parse::<usize>().ok()) {
                Some(capacity) => config.capacity = capacity,
                None => tracing::warn!(value = ?raw, "ignoring unparsable {}", CAPACITY_ENV),
            }
        }
        config
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn with_backoff_sleep(mut self, backoff_sleep: Duration) -> Self {
        self.backoff_sleep = backoff_sleep;
        self
    }

    pub fn with_warning_limit(mut self, warning_limit: u32) -> Self {
        self.warning_limit = warning_limit;
        self
    }

    pub fn with_fault_stream(mut self, fault_stream: Destination) -> Self {
        self.fault_stream = fault_stream;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_affinity(mut self, affinity: Arc<dyn Affinity>) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn with_toggles(mut self, toggles: Arc<Toggles>) -> Self {
        self.toggles = toggles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Identity;

    #[test]
    fn test_defaults() {
        let config = LoggerConfig::default();
        assert_eq!(config.capacity, 256);
        assert_eq!(config.idle_sleep, Duration::from_micros(9_999));
        assert_eq!(config.warning_limit, 100);
        assert!(config.transform.is_none());
        assert!(config.toggles.background());
        assert!(!config.toggles.yield_via_sleep());
        assert!(!config.toggles.log_on_junk());
    }

    #[test]
    fn test_builder_overrides() {
        let toggles = Arc::new(Toggles::default());
        toggles.set_yield_via_sleep(true);
        let config = LoggerConfig::default()
            .with_capacity(8)
            .with_idle_sleep(Duration::from_micros(50))
            .with_warning_limit(3)
            .with_transform(Arc::new(Identity))
            .with_toggles(toggles.clone());
        assert_eq!(config.capacity, 8);
        assert_eq!(config.idle_sleep, Duration::from_micros(50));
        assert_eq!(config.warning_limit, 3);
        assert!(config.transform.is_some());
        assert!(config.toggles.yield_via_sleep());
        assert!(Arc::ptr_eq(&config.toggles, &toggles));
    }
}
