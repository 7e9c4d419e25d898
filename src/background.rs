//! The background consumer and the handle producers submit through.
//!
//! A [`BackgroundLogger`] owns one [`Channel`] and, once started, one consumer
//! thread. Producers encode records straight into claimed slots; the consumer
//! renders them, runs the transform hook and writes them to each record's
//! destination, strictly in claim order.

use std::cell::Cell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::channel::{Channel, ChannelReader, Consume, Slot, SlotHeader, DEFAULT_SLOT_SIZE};
use crate::config::{LoggerConfig, Toggles};
use crate::error::{LoggerError, RecordError, RenderError, Result};
use crate::record::{self, ArgList, PRE_RENDERED_TEMPLATE};
use crate::stream::{Destination, DirtySet};
use crate::transform::Transform;

/// Name given to every consumer thread.
pub const CONSUMER_THREAD_NAME: &str = "bglog-consumer";

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;
const FAILED: u8 = 3;

thread_local! {
    static ON_CONSUMER: Cell<bool> = const { Cell::new(false) };
    static ISOLATED: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is a consumer thread.
pub fn on_consumer_thread() -> bool {
    ON_CONSUMER.with(Cell::get)
}

/// Whether the calling thread is inside the consumer's per-record guard,
/// where panics are caught and reported as record failures.
pub(crate) fn in_isolated_scope() -> bool {
    ISOLATED.with(Cell::get)
}

fn isolated<T>(f: impl FnOnce() -> T) -> std::thread::Result<T> {
    let outer = ISOLATED.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    ISOLATED.with(|flag| flag.set(outer));
    result
}

/// Template shown in warnings about idle and final flushes.
const FLUSH_CONTEXT: &str = "<flush>";

/// Bounded "!!WARNING!!" reporter shared by the consumer and the direct path.
struct Warnings {
    emitted: AtomicU32,
    limit: u32,
    stream: Destination,
}

impl Warnings {
    fn report(&self, err: &RecordError, template: &str) {
        let n = self.emitted.fetch_add(1, Ordering::Relaxed);
        if n >= self.limit {
            return;
        }
        tracing::warn!(error = %err, template, "record failed");
        let last = n + 1 == self.limit;
        if last {
            tracing::warn!(limit = self.limit, "suppressing further record warnings");
        }
        let message = format!(
            "!!WARNING!! Exception caught in background logger: {err}\nFormat line was '{template}'\n"
        );
        // The fault stream is a user stream too: if it panics, the warning is lost.
        let written = isolated(|| {
            let _ = self.stream.write_bytes(message.as_bytes());
            if last {
                let _ = self.stream.write_bytes(b"!!WARNING!! Background logger will stop warning now\n");
            }
            let _ = self.stream.flush();
        });
        if written.is_err() {
            tracing::error!("fault stream panicked, warning dropped");
        }
    }
}

struct Shared<const SLOT: usize> {
    channel: Arc<Channel<SLOT>>,
    config: LoggerConfig,
    transform: RwLock<Option<Arc<dyn Transform>>>,
    warnings: Warnings,
    exit: AtomicBool,
}

impl<const SLOT: usize> Shared<SLOT> {
    /// One step of a producer or drain wait.
    fn wait(&self) {
        if self.config.toggles.yield_via_sleep() {
            self.config.clock.idle_sleep(self.config.backoff_sleep);
        } else {
            thread::yield_now();
        }
    }

    /// Writes rendered text, passing it through the transform hook if one is
    /// installed.
    fn write_out(&self, destination: &Destination, text: &[u8], scratch: &mut Vec<u8>) -> io::Result<()> {
        let transform = self.transform.read().clone();
        write_transformed(destination, transform.as_deref(), text, scratch)
    }

    fn drain(&self) {
        if on_consumer_thread() {
            return;
        }
        self.channel.drain(|| {
            self.wait();
            true
        });
    }

    fn drain_for(&self, timeout: Duration) -> bool {
        if on_consumer_thread() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        self.channel.drain(|| {
            thread::yield_now();
            Instant::now() < deadline
        })
    }
}

fn write_transformed(
    destination: &Destination,
    transform: Option<&dyn Transform>,
    text: &[u8],
    scratch: &mut Vec<u8>,
) -> io::Result<()> {
    match transform {
        Some(transform) => {
            let n = transform.encrypt(text, scratch);
            destination.write_bytes(&scratch[..n])
        }
        None => destination.write_bytes(text),
    }
}

/// Writes and flushes already rendered text on the calling thread.
pub(crate) fn write_direct(
    destination: &Destination,
    transform: Option<&dyn Transform>,
    text: &[u8],
) -> std::result::Result<(), RecordError> {
    let mut scratch = Vec::new();
    write_transformed(destination, transform, text, &mut scratch)?;
    destination.flush()?;
    Ok(())
}

/// Per-thread buffers the consumer reuses across records.
struct Scratch {
    rendered: String,
    transformed: Vec<u8>,
    dirty: DirtySet,
}

/// An asynchronous logger backed by one consumer thread.
///
/// The consumer starts lazily on the first submission (or an explicit
/// [`start`](Self::start)). Dropping the logger drains and stops it.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use parking_lot::Mutex;
/// # use background_logger::{BackgroundLogger, Destination, LoggerConfig};
/// let capture = Arc::new(Mutex::new(Vec::<u8>::new()));
/// let logger = BackgroundLogger::<1024>::new(LoggerConfig::default().with_capacity(16)).unwrap();
/// let out = Destination::from(capture.clone());
///
/// logger.submit(out.clone(), "Hello %d\n", (5,));
/// logger.submit(out.clone(), "Value %s\n", ("abc",));
/// logger.submit(out, "Done\n", ());
/// logger.sync();
///
/// assert_eq!(capture.lock().as_slice(), b"Hello 5\nValue abc\nDone\n");
/// ```
pub struct BackgroundLogger<const SLOT: usize = DEFAULT_SLOT_SIZE> {
    shared: Arc<Shared<SLOT>>,
    state: AtomicU8,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<const SLOT: usize> BackgroundLogger<SLOT> {
    /// Builds a logger. No thread is spawned until the first submission.
    pub fn new(config: LoggerConfig) -> Result<Self> {
        let channel = Arc::new(Channel::new(config.capacity)?);
        let warnings = Warnings {
            emitted: AtomicU32::new(0),
            limit: config.warning_limit,
            stream: config.fault_stream.clone(),
        };
        let transform = RwLock::new(config.transform.clone());
        Ok(Self {
            shared: Arc::new(Shared { channel, config, transform, warnings, exit: AtomicBool::new(false) }),
            state: AtomicU8::new(NOT_STARTED),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.shared.config
    }

    pub fn toggles(&self) -> &Arc<Toggles> {
        &self.shared.config.toggles
    }

    /// Replaces the transform hook. Records already written are unaffected.
    pub fn set_transform(&self, transform: Option<Arc<dyn Transform>>) {
        *self.shared.transform.write() = transform;
    }

    pub fn capacity(&self) -> usize {
        self.shared.channel.capacity()
    }

    pub fn write_count(&self) -> u64 {
        self.shared.channel.write_count()
    }

    pub fn read_count(&self) -> u64 {
        self.shared.channel.read_count()
    }

    /// Records claimed but not yet consumed.
    pub fn next_unread_gap(&self) -> u64 {
        self.shared.channel.next_unread_gap()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Starts the consumer thread if it is not running yet.
    ///
    /// Returns an error if the thread could not be spawned, in which case
    /// every later submission is written directly on its calling thread.
    pub fn start(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) != NOT_STARTED {
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if self.state.load(Ordering::Acquire) != NOT_STARTED {
            return Ok(());
        }
        let Some(reader) = self.shared.channel.take_reader() else {
            self.state.store(FAILED, Ordering::Release);
            return Err(LoggerError::Unsupported("channel already has a reader"));
        };
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.to_string())
            .spawn(move || run_consumer(shared, reader));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                self.state.store(RUNNING, Ordering::Release);
                tracing::debug!(capacity = self.capacity(), slot_bytes = SLOT, "background consumer started");
                Ok(())
            }
            Err(e) => {
                self.state.store(FAILED, Ordering::Release);
                tracing::error!(error = %e, "falling back to direct writes");
                Err(LoggerError::ThreadSpawn(e))
            }
        }
    }

    /// Whether submissions should go through the channel right now.
    fn use_background(&self) -> bool {
        if !self.shared.config.toggles.background() {
            return false;
        }
        match self.state.load(Ordering::Acquire) {
            RUNNING => true,
            NOT_STARTED => self.start().is_ok() && self.is_running(),
            _ => false,
        }
    }

    /// Queues a typed record. Returns as soon as the record is in a slot.
    ///
    /// Stalls while the channel is full. With the background thread switched
    /// off, renders and writes on the calling thread instead.
    pub fn submit<L: ArgList>(&self, destination: Destination, template: &'static str, args: L) {
        if !self.use_background() {
            return self.submit_direct(&destination, template, |out| record::render_direct(template, &args, out));
        }
        let shared = &*self.shared;
        let mut writer = shared.channel.claim_slot(|| shared.wait());
        let slot = writer.slot();
        record::encode(&mut slot.bytes, &args);
        slot.header = Some(SlotHeader { destination, template });
        drop(writer);
        self.write_if_stranded();
    }

    /// Queues text formatted on the calling thread.
    ///
    /// The text is formatted straight into the slot; the consumer only has to
    /// write it. Output beyond the slot size is truncated.
    pub fn submit_fmt(&self, destination: Destination, message: fmt::Arguments<'_>) {
        if !self.use_background() {
            return self.submit_direct(&destination, PRE_RENDERED_TEMPLATE, |out| {
                fmt::write(out, message).map_err(|_| RenderError::InvalidValue { kind: "formatted text", offset: 0 })
            });
        }
        let shared = &*self.shared;
        let mut writer = shared.channel.claim_slot(|| shared.wait());
        let slot = writer.slot();
        record::encode_fmt(&mut slot.bytes, message);
        slot.header = Some(SlotHeader { destination, template: PRE_RENDERED_TEMPLATE });
        drop(writer);
        self.write_if_stranded();
    }

    /// Called after publishing a slot. If the logger stopped while the slot
    /// was being filled, the consumer may already be gone, so whatever is
    /// left in the channel is written on the calling thread.
    ///
    /// Pairs with the fence in [`shutdown`](Self::shutdown): either this
    /// load sees `STOPPED`, or the shutdown drain sees the claim.
    fn write_if_stranded(&self) {
        atomic::fence(Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != STOPPED || on_consumer_thread() {
            return;
        }
        let _worker = self.worker.lock();
        let shared = &*self.shared;
        while shared.channel.next_unread_gap() > 0 {
            // The reader comes free once the consumer thread has exited.
            match shared.channel.take_reader() {
                Some(reader) => {
                    consume_remaining(shared, reader);
                    return;
                }
                None => thread::yield_now(),
            }
        }
    }

    fn submit_direct(
        &self,
        destination: &Destination,
        template: &'static str,
        render: impl FnOnce(&mut String) -> std::result::Result<(), RenderError>,
    ) {
        let shared = &*self.shared;
        let mut rendered = String::new();
        let transform = shared.transform.read().clone();
        let result = render(&mut rendered)
            .map_err(RecordError::from)
            .and_then(|()| write_direct(destination, transform.as_deref(), rendered.as_bytes()));
        if let Err(err) = result {
            shared.warnings.report(&err, template);
        }
    }

    /// Blocks until every record submitted so far has been written.
    ///
    /// Does nothing if the consumer never started, or when called from the
    /// consumer thread itself.
    pub fn sync(&self) {
        if self.state.load(Ordering::Acquire) == NOT_STARTED {
            return;
        }
        self.shared.drain();
    }

    /// Like [`sync`](Self::sync) but gives up after `timeout`. Returns whether
    /// everything was written. Used on crash paths, where the thread that
    /// died may own a slot it will never publish.
    pub fn sync_for(&self, timeout: Duration) -> bool {
        if self.state.load(Ordering::Acquire) == NOT_STARTED {
            return true;
        }
        self.shared.drain_for(timeout)
    }

    /// Drains, stops the consumer and waits for it to finish.
    ///
    /// Later submissions are written directly on their calling thread.
    pub fn shutdown(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            let handle = worker.take();
            if handle.is_some() {
                self.state.store(STOPPED, Ordering::SeqCst);
                atomic::fence(Ordering::SeqCst);
            }
            handle
        };
        let Some(handle) = handle else { return };
        if handle.thread().id() == thread::current().id() {
            // Dropped on its own consumer thread; it exits once the channel is empty.
            self.shared.exit.store(true, Ordering::Release);
            return;
        }
        self.shared.drain();
        self.shared.exit.store(true, Ordering::Release);
        if handle.join().is_err() {
            tracing::error!("background consumer panicked");
        }
        tracing::debug!(written = self.write_count(), "background consumer stopped");
    }
}

impl<const SLOT: usize> Drop for BackgroundLogger<SLOT> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_consumer<const SLOT: usize>(shared: Arc<Shared<SLOT>>, mut reader: ChannelReader<SLOT>) {
    ON_CONSUMER.with(|flag| flag.set(true));
    let config = &shared.config;
    let mut scratch = Scratch {
        rendered: String::with_capacity(SLOT),
        transformed: Vec::with_capacity(SLOT),
        dirty: DirtySet::default(),
    };
    let mut junked = false;

    loop {
        if !junked && config.toggles.log_on_junk() {
            junked = true;
            match isolated(|| config.affinity.set_junk_thread_affinity(true)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "could not move consumer to the junk cpu"),
                Err(payload) => {
                    tracing::warn!(error = %RecordError::from_panic(payload), "affinity change panicked")
                }
            }
        }

        let ready = match reader.consume_next() {
            Consume::Ready(slot) => {
                process_slot(&shared, slot, &mut scratch);
                true
            }
            Consume::Pending => {
                thread::yield_now();
                false
            }
            Consume::Empty => {
                if shared.exit.load(Ordering::Acquire) {
                    break;
                }
                flush_dirty(&*shared, &mut scratch.dirty);
                config.clock.idle_sleep(config.idle_sleep);
                false
            }
        };
        if ready {
            reader.advance_read_count();
        }
    }

    flush_dirty(&*shared, &mut scratch.dirty);
}

/// Writes every record left in the channel on the calling thread. Used
/// once the consumer has exited.
fn consume_remaining<const SLOT: usize>(shared: &Shared<SLOT>, mut reader: ChannelReader<SLOT>) {
    let mut scratch = Scratch { rendered: String::new(), transformed: Vec::new(), dirty: DirtySet::default() };
    loop {
        let ready = match reader.consume_next() {
            Consume::Ready(slot) => {
                process_slot(shared, slot, &mut scratch);
                true
            }
            Consume::Pending => {
                thread::yield_now();
                false
            }
            Consume::Empty => break,
        };
        if ready {
            reader.advance_read_count();
        }
    }
    flush_dirty(shared, &mut scratch.dirty);
}

/// Flushes the streams written since the last flush. Errors and panics are
/// reported like record failures.
fn flush_dirty<const SLOT: usize>(shared: &Shared<SLOT>, dirty: &mut DirtySet) {
    if dirty.is_empty() {
        return;
    }
    let result = match isolated(|| dirty.flush_all()) {
        Ok(flushed) => flushed.map_err(RecordError::from),
        Err(payload) => Err(RecordError::from_panic(payload)),
    };
    if let Err(err) = result {
        shared.warnings.report(&err, FLUSH_CONTEXT);
    }
}

/// Renders and writes one record. Any failure, a panic included, is reported
/// and swallowed so the next record still gets written.
fn process_slot<const SLOT: usize>(shared: &Shared<SLOT>, slot: &mut Slot<SLOT>, scratch: &mut Scratch) {
    let header = slot.header.take();
    let template = header.as_ref().map_or("<missing>", |h| h.template);
    let bytes = &slot.bytes;

    let outcome = isolated(|| -> std::result::Result<(), RecordError> {
        let header = header.as_ref().ok_or(RecordError::MissingHeader)?;
        scratch.rendered.clear();
        record::render(header.template, bytes, &mut scratch.rendered)?;
        shared.write_out(&header.destination, scratch.rendered.as_bytes(), &mut scratch.transformed)?;
        scratch.dirty.mark(&header.destination);
        Ok(())
    });

    let result = outcome.unwrap_or_else(|payload| Err(RecordError::from_panic(payload)));
    if let Err(err) = result {
        shared.warnings.report(&err, template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::NoAffinity;

    fn config() -> LoggerConfig {
        LoggerConfig::default()
            .with_capacity(8)
            .with_idle_sleep(Duration::from_micros(100))
            .with_affinity(Arc::new(NoAffinity))
    }

    fn capture() -> (Arc<Mutex<Vec<u8>>>, Destination) {
        let capture = Arc::new(Mutex::new(Vec::new()));
        let destination = Destination::from(capture.clone());
        (capture, destination)
    }

    #[test]
    fn test_lazy_start() {
        let logger = BackgroundLogger::<256>::new(config()).unwrap();
        assert!(!logger.is_running());
        logger.sync();

        let (out, dest) = capture();
        logger.submit(dest, "%d\n", (1u8,));
        assert!(logger.is_running());
        logger.sync();
        assert_eq!(out.lock().as_slice(), b"1\n");
    }

    #[test]
    fn test_shutdown_then_direct() {
        let logger = BackgroundLogger::<256>::new(config()).unwrap();
        let (out, dest) = capture();
        logger.submit(dest.clone(), "a%s\n", ("b",));
        logger.shutdown();
        assert!(!logger.is_running());
        assert_eq!(logger.write_count(), logger.read_count());

        logger.submit(dest, "c%s\n", ("d",));
        assert_eq!(out.lock().as_slice(), b"ab\ncd\n");
    }

    #[test]
    fn test_missing_header_is_reported() {
        let (warn_out, warn_dest) = capture();
        let shared = Shared::<64> {
            channel: Arc::new(Channel::new(2).unwrap()),
            warnings: Warnings { emitted: AtomicU32::new(0), limit: 5, stream: warn_dest },
            transform: RwLock::new(None),
            config: config(),
            exit: AtomicBool::new(false),
        };
        let mut slot = Slot::<64> { header: None, bytes: [0u8; 64] };
        let mut scratch = Scratch { rendered: String::new(), transformed: Vec::new(), dirty: DirtySet::default() };
        process_slot(&shared, &mut slot, &mut scratch);

        let text = String::from_utf8(warn_out.lock().clone()).unwrap();
        assert!(text.contains("slot was published without a record header"));
        assert!(text.contains("Format line was '<missing>'"));
    }

    #[test]
    fn test_isolated_flag_scoped() {
        assert!(!in_isolated_scope());
        let inside = isolated(in_isolated_scope).unwrap();
        assert!(inside);
        assert!(!in_isolated_scope());

        let nested = isolated(|| {
            let _ = isolated(|| ());
            in_isolated_scope()
        });
        assert!(nested.unwrap());
        assert!(!in_isolated_scope());
    }

    #[test]
    fn test_slot_claimed_after_shutdown_is_written() {
        let logger = BackgroundLogger::<256>::new(config()).unwrap();
        let (out, dest) = capture();
        logger.submit(dest.clone(), "%s\n", ("before",));
        logger.shutdown();

        // a producer that saw the logger running just before it stopped
        let mut writer = logger.shared.channel.claim_slot(thread::yield_now);
        let slot = writer.slot();
        record::encode(&mut slot.bytes, &("late",));
        slot.header = Some(SlotHeader { destination: dest, template: "%s\n" });
        drop(writer);
        assert_eq!(logger.next_unread_gap(), 1);

        logger.write_if_stranded();
        assert_eq!(logger.next_unread_gap(), 0);
        logger.sync();
        assert_eq!(out.lock().as_slice(), b"before\nlate\n");
    }

    #[test]
    fn test_running_logger_leaves_slots_to_consumer() {
        let logger = BackgroundLogger::<256>::new(config()).unwrap();
        let (out, dest) = capture();
        logger.submit(dest, "%d\n", (7,));
        // no-op while the consumer is alive
        logger.write_if_stranded();
        logger.sync();
        assert_eq!(out.lock().as_slice(), b"7\n");
        assert!(logger.is_running());
    }
}
