//! # Background Logger
//!
//! A low-latency asynchronous logger for threads that cannot afford to block
//! on formatting or I/O:
//!
//! * **Cheap call sites**: a log call copies its typed arguments into a
//!   preallocated slot and returns; no allocation, no formatting, no syscall
//! * **One consumer thread**: renders, transforms and writes every record in
//!   submission order
//! * **Bounded memory**: a fixed ring of fixed-size slots; producers stall
//!   rather than grow it, and oversized text is truncated, never overflowed
//! * **Crash hardening**: fatal signals and unhandled panics drain what was
//!   already submitted before the process goes down
//!
//! ## Main Components
//!
//! * [`BackgroundLogger`]: an explicitly owned logger with its own channel
//!   and consumer thread
//! * [`global`]: the process-wide instance behind [`submit!`] and the free
//!   functions
//! * [`record`]: the typed argument encoding that lets one slot hold any mix
//!   of integers, floats and text
//! * [`channel`]: the bounded multi-producer, single-consumer slot ring
//! * [`fault`]: signal handlers, panic hook and exit-time drain
//! * [`LogReader`]: reads back output written through a framing transform
//!
//! ## Quick Start
//!
//! ```
//! use background_logger::{submit, sync, Destination};
//!
//! submit!(Destination::Stdout, "order %d filled at %.2f\n", 42, 101.25);
//! submit!(Destination::Stdout, "venue %s\n", "XNAS");
//! sync();
//! ```

pub mod affinity;
pub mod background;
pub mod bridge;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod fault;
pub mod global;
pub mod log_reader;
pub mod record;
pub mod stream;
pub mod template;
pub mod transform;

pub use background::BackgroundLogger;
pub use bridge::LogBridge;
pub use config::{LoggerConfig, Toggles};
pub use error::{LoggerError, RecordError, RenderError, Result};
pub use global::{
    fatal, install_transform, set_background_enabled, set_log_on_junk, set_yield_via_sleep, shutdown, submit_fmt,
    sync,
};
pub use log_reader::LogReader;
pub use record::{ArgList, LogArg};
pub use stream::{Destination, OutputStream};
pub use transform::{Identity, Transform};

/// Queues a record on the process-wide logger.
///
/// The template is checked at compile time: a malformed placeholder, or a
/// placeholder count that differs from the number of arguments, fails the
/// build.
///
/// ```
/// # use background_logger::{submit, Destination};
/// submit!(Destination::Stderr, "retrying %s in %dms\n", "feed", 250);
/// ```
///
/// ```compile_fail
/// # use background_logger::{submit, Destination};
/// submit!(Destination::Stderr, "%d and %d\n", 1);
/// ```
#[macro_export]
macro_rules! submit {
    ($dest:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::__check_template!($fmt $(, $arg)*);
        $crate::global::submit($dest, $fmt, ($($arg,)*))
    }};
}

/// Logs `!!FATAL!! ` plus the message, drains, and evaluates to the
/// [`LoggerError::Fatal`] to return.
///
/// ```
/// # use background_logger::{fatal, Destination, LoggerError};
/// fn open_book(symbol: &str) -> Result<(), LoggerError> {
///     Err(fatal!(Destination::Stderr, "no reference data for %s\n", symbol))
/// }
/// assert!(matches!(open_book("XYZ"), Err(LoggerError::Fatal(_))));
/// ```
#[macro_export]
macro_rules! fatal {
    ($dest:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::__check_template!($fmt $(, $arg)*);
        $crate::global::fatal($dest, $fmt, ($($arg,)*))
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __check_template {
    ($fmt:literal $(, $arg:expr)*) => {
        const _: () = match $crate::template::count_placeholders($fmt) {
            Some(n) => assert!(
                n == <[()]>::len(&[$($crate::__unit!($arg)),*]),
                "template placeholders do not match the argument count"
            ),
            None => panic!("malformed log template"),
        };
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __unit {
    ($e:expr) => {
        ()
    };
}
