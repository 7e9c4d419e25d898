//! Output destinations.
//!
//! The logger never owns the streams it writes to. A record carries a
//! [`Destination`] naming the stream, and the consumer thread writes the
//! rendered bytes there. Standard out and standard error are built in; any
//! other sink implements [`OutputStream`].

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// A byte sink the consumer thread writes rendered records to.
///
/// Implementations are called from the consumer thread only, but may be
/// shared with the application, hence `Send + Sync`. A panic inside either
/// method is caught and reported like any other per-record failure.
pub trait OutputStream: Send + Sync {
    /// Writes the complete buffer.
    fn write_bytes(&self, buf: &[u8]) -> io::Result<()>;

    /// Flushes anything the stream buffers internally.
    fn flush(&self) -> io::Result<()>;
}

/// Any `Write` behind a mutex is a stream: `Mutex<Vec<u8>>` captures output
/// in memory, `Mutex<File>` writes to a file.
impl<W: Write + Send> OutputStream for Mutex<W> {
    fn write_bytes(&self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&self) -> io::Result<()> {
        Write::flush(&mut *self.lock())
    }
}

/// Where a record goes.
#[derive(Clone)]
pub enum Destination {
    Stdout,
    Stderr,
    Stream(Arc<dyn OutputStream>),
}

impl Destination {
    /// Wraps an application-provided stream.
    pub fn stream(stream: Arc<dyn OutputStream>) -> Self {
        Destination::Stream(stream)
    }

    pub fn write_bytes(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            Destination::Stdout => io::stdout().lock().write_all(buf),
            Destination::Stderr => io::stderr().lock().write_all(buf),
            Destination::Stream(stream) => stream.write_bytes(buf),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        match self {
            Destination::Stdout => io::stdout().flush(),
            Destination::Stderr => io::stderr().flush(),
            Destination::Stream(stream) => stream.flush(),
        }
    }

    /// Whether two destinations name the same stream.
    pub fn same_as(&self, other: &Destination) -> bool {
        match (self, other) {
            (Destination::Stdout, Destination::Stdout) => true,
            (Destination::Stderr, Destination::Stderr) => true,
            (Destination::Stream(a), Destination::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Stdout => f.write_str("Stdout"),
            Destination::Stderr => f.write_str("Stderr"),
            Destination::Stream(stream) => write!(f, "Stream({:p})", Arc::as_ptr(stream)),
        }
    }
}

impl<S: OutputStream + 'static> From<Arc<S>> for Destination {
    fn from(stream: Arc<S>) -> Self {
        Destination::Stream(stream)
    }
}

/// Destinations written since the last idle flush.
///
/// Held by the consumer thread so that an idle pass flushes each stream once.
#[derive(Default)]
pub(crate) struct DirtySet {
    entries: Vec<Destination>,
}

impl DirtySet {
    pub(crate) fn mark(&mut self, destination: &Destination) {
        if !self.entries.iter().any(|d| d.same_as(destination)) {
            self.entries.push(destination.clone());
        }
    }

    /// Flushes and forgets every marked destination, returning the first error.
    pub(crate) fn flush_all(&mut self) -> io::Result<()> {
        let mut result = Ok(());
        for destination in self.entries.drain(..) {
            if let Err(e) = destination.flush() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_vec_captures() {
        let capture = Arc::new(Mutex::new(Vec::new()));
        let destination = Destination::from(capture.clone());
        destination.write_bytes(b"hello ").unwrap();
        destination.write_bytes(b"world").unwrap();
        destination.flush().unwrap();
        assert_eq!(capture.lock().as_slice(), b"hello world");
    }

    #[test]
    fn test_dirty_set_dedupes_streams() {
        let capture: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let a = Destination::from(capture.clone());
        let b = Destination::from(capture);
        let other: Destination = Arc::new(Mutex::new(Vec::<u8>::new())).into();

        let mut dirty = DirtySet::default();
        dirty.mark(&a);
        dirty.mark(&b);
        dirty.mark(&Destination::Stdout);
        dirty.mark(&Destination::Stdout);
        dirty.mark(&other);
        assert_eq!(dirty.entries.len(), 3);
        dirty.flush_all().unwrap();
        assert!(dirty.is_empty());
    }
}
