//! Byte transforms applied to rendered records before they are written.
//!
//! A transform runs on the consumer thread between rendering and writing, so
//! its cost never lands on a producer. The default is [`Identity`]; swapping
//! in an obfuscating or compressing transform changes what ends up on disk
//! without touching any call site.

use crate::error::{LoggerError, Result};

/// A reversible byte transform.
pub trait Transform: Send + Sync {
    /// Transforms `from`, replacing the contents of `to`. Returns the number of
    /// bytes written.
    fn encrypt(&self, from: &[u8], to: &mut Vec<u8>) -> usize;

    /// Reverses [`encrypt`](Transform::encrypt) for one unit of its output.
    fn decrypt(&self, from: &[u8], to: &mut Vec<u8>) -> Result<usize>;
}

/// Passes bytes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Transform for Identity {
    fn encrypt(&self, from: &[u8], to: &mut Vec<u8>) -> usize {
        to.clear();
        to.extend_from_slice(from);
        from.len()
    }

    fn decrypt(&self, from: &[u8], to: &mut Vec<u8>) -> Result<usize> {
        to.clear();
        to.extend_from_slice(from);
        Ok(from.len())
    }
}

/// Bytes of the length prefix in front of every LZ4 frame.
pub const FRAME_PREFIX_BYTES: usize = 4;

/// Compresses each record into a length-prefixed LZ4 block.
///
/// Frame layout: `[body length: u32 LE][uncompressed size: u32 LE][lz4 block]`.
/// The outer length lets [`LogReader`](crate::log_reader::LogReader) split a
/// stream of frames; [`decrypt`](Transform::decrypt) takes one frame body,
/// without the outer length.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Transform;

impl Transform for Lz4Transform {
    fn encrypt(&self, from: &[u8], to: &mut Vec<u8>) -> usize {
        let block = lz4_flex::block::compress_prepend_size(from);
        to.clear();
        to.reserve(FRAME_PREFIX_BYTES + block.len());
        to.extend_from_slice(&(block.len() as u32).to_le_bytes());
        to.extend_from_slice(&block);
        to.len()
    }

    fn decrypt(&self, from: &[u8], to: &mut Vec<u8>) -> Result<usize> {
        let plain = lz4_flex::block::decompress_size_prepended(from)
            .map_err(|e| LoggerError::Corrupt(format!("lz4 frame: {e}")))?;
        to.clear();
        to.extend_from_slice(&plain);
        Ok(plain.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_copies() {
        let mut out = vec![9, 9, 9];
        assert_eq!(Identity.encrypt(b"abc", &mut out), 3);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_lz4_frame_has_length_prefix() {
        let line = b"12:00:00.000001 main.rs:10 the same words the same words the same words\n";
        let mut frame = Vec::new();
        let n = Lz4Transform.encrypt(line, &mut frame);
        assert_eq!(n, frame.len());

        let body_len = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, frame.len() - FRAME_PREFIX_BYTES);

        let mut plain = Vec::new();
        Lz4Transform.decrypt(&frame[FRAME_PREFIX_BYTES..], &mut plain).unwrap();
        assert_eq!(plain, line);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let mut plain = Vec::new();
        let err = Lz4Transform.decrypt(&[5, 0, 0, 0, 0xFF, 0xFF], &mut plain).unwrap_err();
        assert!(matches!(err, LoggerError::Corrupt(_)));
    }
}
