//! Routes the `log` crate's macros through the process-wide logger.
//!
//! Records take the pre-rendered path: the message is formatted on the
//! calling thread straight into a slot, prefixed with the time of day and the
//! call site, and written by the consumer.

use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::clock::{forward_filename, Clock, SystemClock};
use crate::error::{LoggerError, Result};
use crate::global;
use crate::stream::Destination;

/// Marker placed in front of warn and error messages.
pub const WARNING_MARKER: &str = "!!WARNING!! ";

/// Submits a record with its prefix to the process-wide logger.
pub type Sink = dyn Fn(Destination, std::fmt::Arguments<'_>) + Send + Sync;

/// A [`log::Log`] backed by the background logger.
pub struct LogBridge {
    clock: Arc<dyn Clock>,
    sink: Box<Sink>,
}

impl Default for LogBridge {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Box::new(global::submit_fmt))
    }
}

impl LogBridge {
    /// A bridge with its own time source and submission function.
    pub fn new(clock: Arc<dyn Clock>, sink: Box<Sink>) -> Self {
        Self { clock, sink }
    }

    /// Installs the default bridge as the `log` facade's logger.
    pub fn init(max_level: LevelFilter) -> Result<()> {
        log::set_boxed_logger(Box::new(Self::default())).map_err(|_| LoggerError::LoggerAlreadySet)?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn destination(level: Level) -> (Destination, &'static str) {
        match level {
            Level::Error | Level::Warn => (Destination::Stderr, WARNING_MARKER),
            _ => (Destination::Stdout, ""),
        }
    }
}

impl Log for LogBridge {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let (destination, marker) = Self::destination(record.level());
        let file = forward_filename(record.file().unwrap_or("?"));
        let line = record.line().unwrap_or(0);
        (self.sink)(
            destination,
            format_args!("{} {}:{} {}{}\n", self.clock.time_parts(), file, line, marker, record.args()),
        );
    }

    fn flush(&self) {
        global::sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeParts;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FixedClock;

    impl Clock for FixedClock {
        fn time_parts(&self) -> TimeParts {
            TimeParts { hour: 9, minute: 30, second: 0, micros: 42 }
        }

        fn idle_sleep(&self, _duration: Duration) {}
    }

    fn capturing() -> (LogBridge, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let bridge = LogBridge::new(
            Arc::new(FixedClock),
            Box::new(move |destination: Destination, message: std::fmt::Arguments<'_>| {
                sink_seen.lock().push((format!("{destination:?}"), message.to_string()));
            }),
        );
        (bridge, seen)
    }

    #[test]
    fn test_info_goes_to_stdout_with_prefix() {
        let (bridge, seen) = capturing();
        bridge.log(
            &Record::builder()
                .level(Level::Info)
                .file(Some("src/engine/book.rs"))
                .line(Some(17))
                .args(format_args!("spread {}", 3))
                .build(),
        );
        assert_eq!(
            seen.lock().as_slice(),
            &[("Stdout".to_string(), "09:30:00.000042 book.rs:17 spread 3\n".to_string())]
        );
    }

    #[test]
    fn test_warn_goes_to_stderr_with_marker() {
        let (bridge, seen) = capturing();
        bridge.log(
            &Record::builder()
                .level(Level::Warn)
                .file(Some("risk.rs"))
                .line(Some(5))
                .args(format_args!("limit hit"))
                .build(),
        );
        let seen = seen.lock();
        assert_eq!(seen[0].0, "Stderr");
        assert_eq!(seen[0].1, "09:30:00.000042 risk.rs:5 !!WARNING!! limit hit\n");
    }
}
