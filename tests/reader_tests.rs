use background_logger::transform::{Lz4Transform, FRAME_PREFIX_BYTES};
use background_logger::{BackgroundLogger, Destination, Identity, LogReader, LoggerConfig, LoggerError, Transform};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn test_empty_log() {
    let data = Vec::new();
    let mut reader = LogReader::new(&data, &Lz4Transform);
    assert!(reader.read_record().is_none());
}

#[test]
fn test_file_backed_lz4_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orders.log.lz4");
    let file = Arc::new(Mutex::new(File::create(&path).unwrap()));

    {
        let config = LoggerConfig::default().with_capacity(8).with_transform(Arc::new(Lz4Transform));
        let logger: BackgroundLogger<512> = BackgroundLogger::new(config).unwrap();
        let dest = Destination::from(file.clone());
        for id in 0..100u32 {
            logger.submit(dest.clone(), "order %u px %.2f sym %s\n", (id, 10.0 + f64::from(id), "ABC"));
        }
        // dropped here: drains and flushes
    }

    let data = fs::read(&path).unwrap();
    let lines = LogReader::new(&data, &Lz4Transform).read_lines().unwrap();
    assert_eq!(lines.len(), 100);
    assert_eq!(lines[0], "order 0 px 10.00 sym ABC");
    assert_eq!(lines[99], "order 99 px 109.00 sym ABC");
}

#[test]
fn test_frames_are_length_prefixed() {
    let mut frame = Vec::new();
    let n = Lz4Transform.encrypt(b"hello\n", &mut frame);
    let body = u32::from_le_bytes(frame[..FRAME_PREFIX_BYTES].try_into().unwrap()) as usize;
    assert_eq!(n, FRAME_PREFIX_BYTES + body);

    let mut reader = LogReader::new(&frame[..n], &Lz4Transform);
    assert_eq!(reader.next_frame().unwrap().unwrap().len(), body);
    assert!(reader.next_frame().is_none());
}

#[test]
fn test_corrupt_body_reported() {
    // valid length prefix, garbage lz4 body
    let data = [6u8, 0, 0, 0, 4, 0, 0, 0, 0xF0, 0xFF];
    let mut reader = LogReader::new(&data, &Lz4Transform);
    assert!(matches!(reader.read_record(), Some(Err(LoggerError::Corrupt(_)))));
    assert!(reader.read_record().is_none());
}

#[test]
fn test_identity_needs_framing() {
    // Identity output has no frame prefix, so reading it as frames fails.
    let mut out = Vec::new();
    Identity.encrypt(b"plain text\n", &mut out);
    let mut reader = LogReader::new(&out, &Identity);
    assert!(matches!(reader.read_record(), Some(Err(LoggerError::Corrupt(_)))));
}
