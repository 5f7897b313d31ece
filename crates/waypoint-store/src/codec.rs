//! Stored payload encodings
//!
//! A checkpoint payload is the canonical encoding of its state, optionally
//! gzip-compressed. The checksum is always taken over the canonical bytes, so
//! compression never changes what a restore verifies.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Immutable stored bytes
///
/// Cloning shares the buffer, which lets a restore keep reading a payload
/// after retention has dropped it from the active list.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Plain(Arc<[u8]>),
    Gzip(Arc<[u8]>),
}

impl Payload {
    /// Bytes actually held in memory
    pub(crate) fn stored_len(&self) -> usize {
        match self {
            Self::Plain(bytes) | Self::Gzip(bytes) => bytes.len(),
        }
    }

    pub(crate) fn is_compressed(&self) -> bool {
        matches!(self, Self::Gzip(_))
    }

    /// Recover the canonical encoding
    pub(crate) fn canonical_bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        match self {
            Self::Plain(bytes) => Ok(Cow::Borrowed(&bytes[..])),
            Self::Gzip(bytes) => gunzip(bytes).map(Cow::Owned),
        }
    }

    /// Same underlying buffer
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Plain(a), Self::Plain(b)) | (Self::Gzip(a), Self::Gzip(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn tampered(&self) -> Self {
        let flip = |bytes: &Arc<[u8]>| -> Arc<[u8]> {
            let mut copy = bytes.to_vec();
            let mid = copy.len() / 2;
            copy[mid] ^= 0x20;
            Arc::from(copy)
        };
        match self {
            Self::Plain(bytes) => Self::Plain(flip(bytes)),
            Self::Gzip(bytes) => Self::Gzip(flip(bytes)),
        }
    }
}

pub(crate) fn gzip(bytes: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub(crate) fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
