//! Error types for the background logger.
//!
//! Three layers of failure exist:
//!
//! * [`LoggerError`] for operations a caller can observe (construction,
//!   affinity changes, fatal-log calls, reading transformed output).
//! * [`RenderError`] for a single record whose bytes or template cannot be
//!   turned back into text.
//! * [`RecordError`] for anything that went wrong while the consumer thread
//!   handled one record. These never leave the consumer thread.

use std::io;
use thiserror::Error;

/// Errors surfaced to callers of the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A channel needs room for at least two slots.
    #[error("invalid channel capacity {capacity}: at least 2 slots are required")]
    InvalidCapacity { capacity: usize },

    /// The consumer thread could not be spawned.
    #[error("failed to spawn background consumer thread: {0}")]
    ThreadSpawn(io::Error),

    /// Changing the consumer's CPU affinity failed.
    #[error("failed to set cpu affinity to cpu {cpu}: {message}")]
    Affinity { cpu: usize, message: String },

    /// The capability is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Raised by an explicit fatal-log call.
    #[error("fatal error logged: {0}")]
    Fatal(String),

    /// Transformed output could not be read back.
    #[error("corrupt log data: {0}")]
    Corrupt(String),

    /// Slots must be able to hold at least a record header and one argument.
    #[error("invalid slot size {size}: at least {minimum} bytes are required")]
    InvalidSlotSize { size: usize, minimum: usize },

    /// A `log` facade logger was already installed.
    #[error("a logger is already installed for the log facade")]
    LoggerAlreadySet,
}

/// A record that could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template references argument {index} but the record holds fewer")]
    MissingArgument { index: usize },

    #[error("template consumed {used} arguments but {supplied} were supplied")]
    ExtraArguments { used: usize, supplied: usize },

    #[error("bad conversion specifier '{found}' at offset {offset}")]
    BadSpecifier { offset: usize, found: char },

    #[error("conversion '%{conversion}' cannot render a {kind} argument")]
    TypeMismatch { conversion: char, kind: &'static str },

    #[error("unknown argument tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("record bytes end unexpectedly at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("text argument at offset {offset} is not valid utf-8")]
    InvalidUtf8 { offset: usize },

    #[error("invalid {kind} value at offset {offset}")]
    InvalidValue { kind: &'static str, offset: usize },

    #[error("unknown record layout {0}")]
    UnknownLayout(u8),
}

/// Failure while the consumer handled one record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("write failed: {0}")]
    Write(#[from] io::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("slot was published without a record header")]
    MissingHeader,
}

impl RecordError {
    /// Builds a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        RecordError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub type Result<T> = std::result::Result<T, LoggerError>;
