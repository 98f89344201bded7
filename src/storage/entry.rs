//! Entry codec: serialize/deserialize a single on-disk log record.
//!
//! Layout (all multi-byte integers big-endian):
//!
//! ```text
//! crc32 (4B) | expiration_ms (8B) | key_size (4B) | value_size (4B) | key | value
//! ```
//!
//! `crc32` covers everything after itself: the 16-byte tail of the header
//! plus the key and value bytes. Header size is fixed at 20 bytes.

use crate::value::{self, Value};

/// Error raised while decoding a single entry, before any file/position
/// context is known. Callers in `datafile`/`store` attach that context when
/// surfacing this as a [`super::error::Error`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record shorter than header: {0} bytes")]
    TooShort(usize),
    #[error("key_size must be > 0")]
    EmptyKey,
    #[error("declared length {expected} does not match record length {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("value blob decode failed: {0}")]
    ValueDecode(#[from] value::DecodeError),
}

type Result<T> = std::result::Result<T, DecodeError>;

/// Fixed size of the header, including the leading CRC field.
pub const HEADER_SIZE: usize = 20;

/// A single decoded log record. Decoding never filters expired or deleted
/// entries — that is left to callers (store reads filter; merge does not).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub expiration_ms: u64,
    pub key: Vec<u8>,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: Value, expiration_ms: u64) -> Self {
        Entry {
            expiration_ms,
            key: key.into(),
            value,
        }
    }
}

/// Returns `true` if `now_ms >= expiration_ms` and an expiration was set.
pub fn is_expired(entry: &Entry, now_ms: u64) -> bool {
    is_expired_at(entry.expiration_ms, now_ms)
}

/// Same check as [`is_expired`] but against a bare expiration timestamp,
/// for callers (like the keydir) that don't have a full `Entry` in hand.
pub fn is_expired_at(expiration_ms: u64, now_ms: u64) -> bool {
    expiration_ms != 0 && now_ms >= expiration_ms
}

/// Returns `true` if the entry's value is the designated tombstone sentinel.
pub fn is_tombstone(entry: &Entry) -> bool {
    value::is_tombstone(&entry.value)
}

/// Encodes a full log record ready to be appended to a datafile.
pub fn encode(key: &[u8], value: &Value, expiration_ms: u64) -> Vec<u8> {
    let value_blob = value::encode(value);
    let mut tail = Vec::with_capacity(16 + key.len() + value_blob.len());
    tail.extend_from_slice(&expiration_ms.to_be_bytes());
    tail.extend_from_slice(&(key.len() as u32).to_be_bytes());
    tail.extend_from_slice(&(value_blob.len() as u32).to_be_bytes());
    tail.extend_from_slice(key);
    tail.extend_from_slice(&value_blob);

    let crc = crc32fast::hash(&tail);
    let mut out = Vec::with_capacity(4 + tail.len());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&tail);
    out
}

/// Decodes a complete record previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Entry> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    let crc = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let expiration_ms = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
    let key_size = u32::from_be_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let value_size = u32::from_be_bytes(bytes[16..20].try_into().unwrap()) as usize;

    if key_size == 0 {
        return Err(DecodeError::EmptyKey);
    }

    let expected_len = HEADER_SIZE + key_size + value_size;
    if bytes.len() != expected_len {
        return Err(DecodeError::LengthMismatch {
            expected: expected_len,
            actual: bytes.len(),
        });
    }

    let tail = &bytes[4..];
    let recomputed = crc32fast::hash(tail);
    if recomputed != crc {
        return Err(DecodeError::ChecksumMismatch);
    }

    let key = bytes[HEADER_SIZE..HEADER_SIZE + key_size].to_vec();
    let value_blob = &bytes[HEADER_SIZE + key_size..expected_len];
    let value = value::decode(value_blob)?;

    Ok(Entry {
        expiration_ms,
        key,
        value,
    })
}

/// Reads just the header to learn the total size of the record that follows,
/// without needing the whole record in memory yet. Used by [`super::datafile`]
/// when scanning or positioning a read.
pub fn decode_total_size(header: &[u8; HEADER_SIZE]) -> usize {
    let key_size = u32::from_be_bytes(header[12..16].try_into().unwrap()) as usize;
    let value_size = u32::from_be_bytes(header[16..20].try_into().unwrap()) as usize;
    HEADER_SIZE + key_size + value_size
}
