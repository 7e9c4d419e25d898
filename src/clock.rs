//! Time-source capability.
//!
//! The logger needs two things from a clock: the wall-clock time of day for
//! line prefixes, and a sleep primitive for idle back-off. Both sit behind
//! [`Clock`] so tests can substitute a deterministic source.

use std::fmt;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Wall-clock time of day, UTC, at microsecond resolution.
///
/// # Examples
///
/// ```
/// # use background_logger::clock::TimeParts;
/// let parts = TimeParts::from_epoch_nanos(3_723_000_004_000);
/// assert_eq!((parts.hour, parts.minute, parts.second, parts.micros), (1, 2, 3, 4));
/// assert_eq!(parts.to_string(), "01:02:03.000004");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeParts {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub micros: u32,
}

impl TimeParts {
    /// Decomposes nanoseconds since the Unix epoch.
    pub fn from_epoch_nanos(nanos: u64) -> Self {
        let secs = nanos / 1_000_000_000;
        let sub = nanos % 1_000_000_000;
        let since_midnight = secs % SECS_PER_DAY;
        Self {
            hour: (since_midnight / 3600) as u32,
            minute: ((since_midnight / 60) % 60) as u32,
            second: (since_midnight % 60) as u32,
            micros: (sub / 1000) as u32,
        }
    }
}

impl fmt::Display for TimeParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}.{:06}", self.hour, self.minute, self.second, self.micros)
    }
}

/// Source of wall-clock time and idle sleeps.
pub trait Clock: Send + Sync {
    /// Current time of day.
    fn time_parts(&self) -> TimeParts;

    /// Sleeps the calling thread. Implementations honour microsecond
    /// resolution as far as the OS allows.
    fn idle_sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_parts(&self) -> TimeParts {
        TimeParts::from_epoch_nanos(epoch_nanos())
    }

    fn idle_sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Nanoseconds since the Unix epoch, 0 if the system clock is before it.
#[inline]
pub fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Strips the directory part of a source path: `src/net/conn.rs` becomes
/// `conn.rs`.
pub fn forward_filename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}
