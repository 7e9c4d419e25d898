//! The process-wide logger behind the free functions and the `submit!` macro.
//!
//! The instance is built on first use from [`LoggerConfig::from_env`] and the
//! process-wide [`Toggles`]. Building it also installs the fault handlers, so
//! a crash or an unhandled panic drains whatever was already submitted.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::background::{self, BackgroundLogger};
use crate::config::{self, LoggerConfig, Toggles, DEFAULT_CAPACITY};
use crate::error::{LoggerError, RenderError};
use crate::fault;
use crate::record::{self, ArgList};
use crate::stream::Destination;
use crate::transform::{Identity, Transform};

lazy_static! {
    static ref TOGGLES: Arc<Toggles> = Arc::new(Toggles::from_env());
    static ref TRANSFORM: RwLock<Arc<dyn Transform>> = RwLock::new(Arc::new(Identity));
}

static INSTANCE: OnceLock<Option<BackgroundLogger>> = OnceLock::new();

fn build() -> Option<BackgroundLogger> {
    let mut config = LoggerConfig::from_env().with_toggles(Arc::clone(&TOGGLES));
    if config.capacity < 2 {
        tracing::warn!(capacity = config.capacity, default = DEFAULT_CAPACITY, "capacity too small, using default");
        config.capacity = DEFAULT_CAPACITY;
    }
    if config::transform_enabled_by_env() {
        config.transform = Some(Arc::clone(&TRANSFORM.read()));
    }
    fault::install();
    match BackgroundLogger::new(config) {
        Ok(logger) => Some(logger),
        Err(e) => {
            tracing::error!(error = %e, "process-wide logger unavailable, writing directly");
            None
        }
    }
}

/// The process-wide logger, built on first call.
///
/// `None` only if it could not be built, in which case the free functions
/// write directly on the calling thread.
pub fn logger() -> Option<&'static BackgroundLogger> {
    INSTANCE.get_or_init(build).as_ref()
}

/// The process-wide logger if something already built it.
fn existing() -> Option<&'static BackgroundLogger> {
    INSTANCE.get().and_then(Option::as_ref)
}

/// The toggles shared by the process-wide logger.
pub fn toggles() -> &'static Arc<Toggles> {
    &TOGGLES
}

/// Queues a typed record on the process-wide logger.
///
/// Prefer the [`submit!`](crate::submit) macro, which checks the template
/// against the argument count at compile time.
pub fn submit<L: ArgList>(destination: Destination, template: &'static str, args: L) {
    match logger() {
        Some(logger) => logger.submit(destination, template, args),
        None => {
            let mut rendered = String::new();
            let result = record::render_direct(template, &args, &mut rendered);
            write_fallback(&destination, result.map(|()| rendered), template);
        }
    }
}

/// Queues text formatted on the calling thread.
pub fn submit_fmt(destination: Destination, message: fmt::Arguments<'_>) {
    match logger() {
        Some(logger) => logger.submit_fmt(destination, message),
        None => write_fallback(&destination, Ok(fmt::format(message)), record::PRE_RENDERED_TEMPLATE),
    }
}

fn write_fallback(
    destination: &Destination,
    rendered: std::result::Result<String, RenderError>,
    template: &str,
) {
    let transform = config::transform_enabled_by_env().then(|| Arc::clone(&TRANSFORM.read()));
    let result = rendered
        .map_err(Into::into)
        .and_then(|text| background::write_direct(destination, transform.as_deref(), text.as_bytes()));
    if let Err(e) = result {
        tracing::warn!(error = %e, template, "direct write failed");
    }
}

/// Blocks until everything submitted to the process-wide logger is written.
/// Does nothing if it was never used.
pub fn sync() {
    if let Some(logger) = existing() {
        logger.sync();
    }
}

/// [`sync`] with a time limit. Returns whether everything was written.
pub fn sync_for(timeout: Duration) -> bool {
    existing().map_or(true, |logger| logger.sync_for(timeout))
}

/// Drains and stops the process-wide consumer. Later submissions are written
/// directly on their calling thread.
pub fn shutdown() {
    if let Some(logger) = existing() {
        logger.shutdown();
    }
}

/// Turns the background thread on or off. While off, every submission is
/// rendered and written on its calling thread.
pub fn set_background_enabled(on: bool) {
    TOGGLES.set_background(on);
}

/// Chooses sleeping over yielding while producers or `sync` wait.
pub fn set_yield_via_sleep(on: bool) {
    TOGGLES.set_yield_via_sleep(on);
}

/// Moves the consumer to the last CPU on its next loop iteration.
pub fn set_log_on_junk(on: bool) {
    TOGGLES.set_log_on_junk(on);
}

/// Installs the transform used when `BGLOG_TRANSFORM` is set.
///
/// Without that variable the transform is stored but not applied.
pub fn install_transform(transform: Arc<dyn Transform>) {
    *TRANSFORM.write() = Arc::clone(&transform);
    if config::transform_enabled_by_env() {
        if let Some(logger) = logger() {
            logger.set_transform(Some(transform));
        }
    }
}

/// Logs `!!FATAL!! ` followed by the rendered message, drains, and returns
/// the error for the caller to propagate.
pub fn fatal<L: ArgList>(destination: Destination, template: &'static str, args: L) -> LoggerError {
    let mut message = String::new();
    if let Err(e) = record::render_direct(template, &args, &mut message) {
        message = format!("{template} ({e})");
    }
    submit_fmt(destination, format_args!("!!FATAL!! {message}"));
    sync();
    LoggerError::Fatal(message)
}
