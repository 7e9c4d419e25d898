//! Crash hardening for the process-wide logger.
//!
//! [`install`] wires the logger into the process's fatal paths:
//!
//! * `SIGSEGV`, `SIGBUS` and `SIGABRT` print `Caught SIGNAL <n>` and then run
//!   the termination path.
//! * A panic hook drains the logger before the panic is reported. With
//!   [`PanicMode::Terminate`] it runs the termination path instead, so an
//!   unhandled panic on any thread takes the process down with a backtrace.
//! * An `atexit` handler drains and stops the consumer on normal exit.
//!
//! The termination path drains, prints a backtrace and aborts. If it is
//! entered a second time, because something inside it crashed, it exits at
//! once without attempting any of that again.

use std::backtrace::Backtrace;
use std::io::{self, Write};
use std::panic;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Once;
use std::time::Duration;

use crate::background;
use crate::error::panic_message;
use crate::global;

/// How long the termination path waits for the consumer to drain. The thread
/// that crashed may hold a slot it will never publish.
pub const FAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Exit status used when the termination path is re-entered.
pub const REENTRY_EXIT_CODE: i32 = 255;

/// Signals that run the termination path.
#[cfg(unix)]
pub const FATAL_SIGNALS: [libc::c_int; 3] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGABRT];

/// What the panic hook does after draining.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicMode {
    /// Hand over to the previously installed hook; the panic unwinds as usual.
    Report = 0,
    /// Print a backtrace and abort the process.
    Terminate = 1,
}

/// What a caller of [`TerminationGuard::enter`] should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStep {
    /// First entry: drain, print diagnostics, abort.
    Diagnose,
    /// Re-entry: terminate immediately.
    ExitNow,
}

/// Counts entries into the termination path.
#[derive(Debug, Default)]
pub struct TerminationGuard {
    entries: AtomicU32,
}

impl TerminationGuard {
    pub const fn new() -> Self {
        Self { entries: AtomicU32::new(0) }
    }

    pub fn enter(&self) -> TerminationStep {
        match self.entries.fetch_add(1, Ordering::AcqRel) {
            0 => TerminationStep::Diagnose,
            _ => TerminationStep::ExitNow,
        }
    }

    pub fn entries(&self) -> u32 {
        self.entries.load(Ordering::Acquire)
    }
}

static INSTALL: Once = Once::new();
static GUARD: TerminationGuard = TerminationGuard::new();
static PANIC_MODE: AtomicU8 = AtomicU8::new(PanicMode::Report as u8);

/// Installs the signal handlers, panic hook and exit handler. Runs once per
/// process; later calls do nothing.
///
/// The hook starts in [`PanicMode::Report`], which drains and hands the panic
/// on. Call [`set_panic_mode`]`(PanicMode::Terminate)` to have an uncaught
/// panic drain, print a backtrace and abort like a fatal signal.
pub fn install() {
    INSTALL.call_once(|| {
        install_signal_handlers();
        install_panic_hook();
        register_teardown();
        tracing::debug!("fault handlers installed");
    });
}

pub fn is_installed() -> bool {
    INSTALL.is_completed()
}

pub fn set_panic_mode(mode: PanicMode) {
    PANIC_MODE.store(mode as u8, Ordering::Relaxed);
}

pub fn panic_mode() -> PanicMode {
    match PANIC_MODE.load(Ordering::Relaxed) {
        1 => PanicMode::Terminate,
        _ => PanicMode::Report,
    }
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        // The consumer reports panics from its per-record guard itself.
        if background::in_isolated_scope() {
            return;
        }
        match panic_mode() {
            PanicMode::Report => {
                global::sync_for(FAULT_DRAIN_TIMEOUT);
                previous(info);
            }
            PanicMode::Terminate => {
                let location = info
                    .location()
                    .map(|l| format!(" at {}:{}", l.file(), l.line()))
                    .unwrap_or_default();
                terminate(&format!(
                    "caught unhandled panic{location}: {}",
                    panic_message(info.payload())
                ));
            }
        }
    }));
}

/// Drains, prints `reason` and a backtrace to stderr, then aborts.
pub fn terminate(reason: &str) -> ! {
    if GUARD.enter() == TerminationStep::ExitNow {
        exit_now();
    }
    global::sync_for(FAULT_DRAIN_TIMEOUT);

    let backtrace = Backtrace::force_capture();
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "{reason}");
    let _ = writeln!(err, "[bt]:\n{backtrace}");
    let _ = err.flush();
    drop(err);

    restore_default_abort();
    std::process::abort()
}

#[cfg(unix)]
fn restore_default_abort() {
    // SAFETY: resetting a disposition has no preconditions. Without it our
    // own abort would re-enter the handler.
    unsafe {
        libc::signal(libc::SIGABRT, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn restore_default_abort() {}

#[cfg(unix)]
fn exit_now() -> ! {
    // SAFETY: `_exit` skips atexit handlers and destructors.
    unsafe { libc::_exit(REENTRY_EXIT_CODE) }
}

#[cfg(not(unix))]
fn exit_now() -> ! {
    std::process::exit(REENTRY_EXIT_CODE)
}

#[cfg(unix)]
fn register_teardown() {
    // SAFETY: `teardown` is an `extern "C" fn()` with no preconditions.
    if unsafe { libc::atexit(teardown) } != 0 {
        tracing::warn!("could not register exit handler");
    }
}

#[cfg(not(unix))]
fn register_teardown() {}

#[cfg(not(unix))]
fn install_signal_handlers() {}

#[cfg(unix)]
fn install_signal_handlers() {
    use std::{mem, ptr};

    // SAFETY: the action is zeroed and its mask emptied before use; the
    // handler has the one-argument signature sigaction expects without
    // SA_SIGINFO.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_fatal_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_NODEFER;
        libc::sigemptyset(&mut action.sa_mask);
        for signal in FATAL_SIGNALS {
            if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
                tracing::warn!(signal, error = %io::Error::last_os_error(), "could not install signal handler");
            }
        }
    }
}

#[cfg(unix)]
extern "C" fn on_fatal_signal(signal: libc::c_int) {
    let mut buf = [0u8; 32];
    let len = {
        let mut cursor = io::Cursor::new(&mut buf[..]);
        let _ = writeln!(cursor, "Caught SIGNAL {signal}");
        cursor.position() as usize
    };
    // SAFETY: write(2) is async-signal-safe and `buf[..len]` is initialised.
    unsafe {
        libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), len);
    }
    terminate(&format!("caught signal {signal}"));
}

#[cfg(unix)]
extern "C" fn teardown() {
    global::shutdown();
}
