//! Reading transformed log output back.
//!
//! Only needed when a framing transform such as LZ4 sits between the
//! consumer and the stream; plain output is already text.

use crate::error::{LoggerError, Result};
use crate::transform::{Transform, FRAME_PREFIX_BYTES};

/// Reader for output written through a framing transform.
///
/// A framing transform such as [`Lz4Transform`](crate::transform::Lz4Transform)
/// turns each rendered record into `[body length: u32 LE][body]`. The reader
/// splits a byte stream back into those frames and reverses the transform on
/// each, yielding the records' original text.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use parking_lot::Mutex;
/// # use background_logger::{BackgroundLogger, Destination, LoggerConfig, LogReader};
/// # use background_logger::transform::Lz4Transform;
/// let file = Arc::new(Mutex::new(Vec::<u8>::new()));
/// let config = LoggerConfig::default().with_transform(Arc::new(Lz4Transform));
/// let logger = BackgroundLogger::<1024>::new(config).unwrap();
/// logger.submit(Destination::from(file.clone()), "order %d filled\n", (7,));
/// logger.sync();
///
/// let data = file.lock().clone();
/// let mut reader = LogReader::new(&data, &Lz4Transform);
/// assert_eq!(reader.read_record().unwrap().unwrap(), "order 7 filled\n");
/// assert!(reader.read_record().is_none());
/// ```
pub struct LogReader<'a> {
    data: &'a [u8],
    position: usize,
    transform: &'a dyn Transform,
    plain: Vec<u8>,
}

impl<'a> LogReader<'a> {
    /// Creates a reader over `data`, reversing `transform` frame by frame.
    pub fn new(data: &'a [u8], transform: &'a dyn Transform) -> Self {
        Self { data, position: 0, transform, plain: Vec::new() }
    }

    /// Byte offset of the next frame.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the next frame's body without decoding it, or `None` at the end
    /// of the data.
    pub fn next_frame(&mut self) -> Option<Result<&'a [u8]>> {
        let rest = &self.data[self.position..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < FRAME_PREFIX_BYTES {
            self.position = self.data.len();
            return Some(Err(LoggerError::Corrupt(format!(
                "truncated frame header: {} trailing bytes",
                rest.len()
            ))));
        }
        let mut prefix = [0u8; FRAME_PREFIX_BYTES];
        prefix.copy_from_slice(&rest[..FRAME_PREFIX_BYTES]);
        let body_len = u32::from_le_bytes(prefix) as usize;
        let Some(body) = rest.get(FRAME_PREFIX_BYTES..FRAME_PREFIX_BYTES + body_len) else {
            self.position = self.data.len();
            return Some(Err(LoggerError::Corrupt(format!(
                "frame of {} bytes runs past the end of the data",
                body_len
            ))));
        };
        self.position += FRAME_PREFIX_BYTES + body_len;
        Some(Ok(body))
    }

    /// Decodes the next record's text.
    ///
    /// A corrupt frame is reported once; reading stops after a framing error
    /// since the next frame boundary is unknown.
    pub fn read_record(&mut self) -> Option<Result<String>> {
        let body = match self.next_frame()? {
            Ok(body) => body,
            Err(e) => return Some(Err(e)),
        };
        let result = self.transform.decrypt(body, &mut self.plain).and_then(|n| {
            String::from_utf8(self.plain[..n].to_vec())
                .map_err(|e| LoggerError::Corrupt(format!("record is not utf-8: {e}")))
        });
        Some(result)
    }

    /// Reads every remaining record and splits them into lines.
    pub fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(record) = self.read_record() {
            lines.extend(record?.lines().map(str::to_string));
        }
        Ok(lines)
    }
}

impl Iterator for LogReader<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}
