//! Self-describing value payloads and their integrity check.
//!
//! A non-empty value starts with a 5-byte header:
//!
//! ```text
//! [CHECKSUM_BE (4 B)][TAG (1 B)][DATA...]
//! ```
//!
//! The checksum is a CRC32 over the user key followed by `[TAG][DATA...]`,
//! which binds the payload to the key it was written under. A stored
//! checksum of `0` means "not computed" and is never verified; a computed
//! CRC of `0` is therefore folded to `1`. An empty value (a deletion
//! tombstone at the MVCC layer) carries no header and always verifies.

use crc32fast::Hasher as Crc32;
use thiserror::Error;

const CHECKSUM_SIZE: usize = 4;
const TAG_SIZE: usize = 1;

/// Size of the value header in bytes.
pub const VALUE_HEADER_SIZE: usize = CHECKSUM_SIZE + TAG_SIZE;

const CHECKSUM_UNINITIALIZED: u32 = 0;

/// Integrity failures detected in a raw value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The value is non-empty but shorter than its header.
    #[error("{key}: invalid header size: {len}")]
    InvalidHeaderSize {
        /// User key the value was read under, escaped for display.
        key: String,
        /// Length of the raw value.
        len: usize,
    },

    /// The stored checksum does not match the recomputed one.
    #[error("{key}: invalid checksum ({computed:08x}) value [{stored:08x}]")]
    ChecksumMismatch {
        /// User key the value was read under, escaped for display.
        key: String,
        /// Checksum stored in the header.
        stored: u32,
        /// Checksum computed over key and payload.
        computed: u32,
    },
}

/// Borrowed view over a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<'a> {
    raw: &'a [u8],
}

impl<'a> Value<'a> {
    /// Wraps raw value bytes as read from a table.
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    /// The stored checksum, or `0` if the value has no complete header.
    pub fn checksum(&self) -> u32 {
        match self.raw.first_chunk::<CHECKSUM_SIZE>() {
            Some(bytes) if self.raw.len() >= VALUE_HEADER_SIZE => u32::from_be_bytes(*bytes),
            _ => CHECKSUM_UNINITIALIZED,
        }
    }

    /// The payload type tag, if present.
    pub fn tag(&self) -> Option<u8> {
        self.raw.get(CHECKSUM_SIZE).copied()
    }

    /// The payload after the header.
    pub fn data(&self) -> &'a [u8] {
        self.raw.get(VALUE_HEADER_SIZE..).unwrap_or_default()
    }

    /// Verifies the header shape and, when one is stored, the checksum.
    pub fn verify(&self, key: &[u8]) -> Result<(), ValueError> {
        let len = self.raw.len();
        if len > 0 && len < VALUE_HEADER_SIZE {
            return Err(ValueError::InvalidHeaderSize {
                key: key.escape_ascii().to_string(),
                len,
            });
        }
        let stored = self.checksum();
        if stored != CHECKSUM_UNINITIALIZED {
            let computed = compute_checksum(key, self.raw);
            if computed != stored {
                return Err(ValueError::ChecksumMismatch {
                    key: key.escape_ascii().to_string(),
                    stored,
                    computed,
                });
            }
        }
        Ok(())
    }
}

/// Verifies `raw` as the value stored under `key`.
pub fn verify(key: &[u8], raw: &[u8]) -> Result<(), ValueError> {
    Value::new(raw).verify(key)
}

/// Builds a checksummed value for `key` with the given tag and payload.
///
/// Used to prepare payloads for tables produced elsewhere and by tests.
pub fn encode_checksummed(key: &[u8], tag: u8, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(VALUE_HEADER_SIZE + data.len());
    raw.extend_from_slice(&[0; CHECKSUM_SIZE]);
    raw.push(tag);
    raw.extend_from_slice(data);
    let sum = compute_checksum(key, &raw);
    raw[..CHECKSUM_SIZE].copy_from_slice(&sum.to_be_bytes());
    raw
}

fn compute_checksum(key: &[u8], raw: &[u8]) -> u32 {
    if raw.len() < VALUE_HEADER_SIZE {
        return CHECKSUM_UNINITIALIZED;
    }
    let mut hasher = Crc32::new();
    hasher.update(key);
    hasher.update(&raw[CHECKSUM_SIZE..]);
    match hasher.finalize() {
        CHECKSUM_UNINITIALIZED => 1,
        sum => sum,
    }
}
