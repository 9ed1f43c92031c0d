//! MVCC key model and its byte encoding.
//!
//! An encoded key is the user key followed by an optional timestamp and a
//! single trailing length byte:
//!
//! ```text
//! no timestamp:        [KEY][0x00]
//! wall time:           [KEY][0x00][WALL_TIME_BE (8 B)][0x09]
//! wall time + logical: [KEY][0x00][WALL_TIME_BE (8 B)][LOGICAL_BE (4 B)][0x0D]
//! ```
//!
//! The trailing byte counts the timestamp bytes including the `0x00`
//! sentinel, so a key can be split from the right without knowing where the
//! user key ends.

use std::fmt;

use thiserror::Error;

const SENTINEL_LEN: usize = 1;
const WALL_TIME_LEN: usize = 8;
const LOGICAL_LEN: usize = 4;

/// Errors produced while decoding an encoded MVCC key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The trailing length byte does not fit inside the key.
    #[error("invalid encoded mvcc key: {0:02x?}")]
    InvalidEncoding(Vec<u8>),

    /// The timestamp section has a length other than 0, 8 or 12 bytes.
    #[error("invalid encoded mvcc key timestamp length {len}: {key:02x?}")]
    InvalidTimestampLength {
        /// Length of the timestamp section, sentinel excluded.
        len: usize,
        /// The offending encoded key.
        key: Vec<u8>,
    },
}

// ------------------------------------------------------------------------------------------------
// Timestamp
// ------------------------------------------------------------------------------------------------

/// Hybrid-logical-clock timestamp attached to a key version.
///
/// The zero timestamp means "no timestamp": such a key is a meta (intent)
/// key rather than a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Physical wall time, nanoseconds.
    pub wall_time: i64,
    /// Logical counter breaking ties within one wall time.
    pub logical: i32,
}

impl Timestamp {
    /// Creates a timestamp from its two components.
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Returns `true` for the zero timestamp.
    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.logical == 0
    }

    /// Number of bytes this timestamp occupies in an encoded key, sentinel
    /// and length byte excluded.
    fn encoded_len(&self) -> usize {
        if self.is_empty() {
            0
        } else if self.logical == 0 {
            WALL_TIME_LEN
        } else {
            WALL_TIME_LEN + LOGICAL_LEN
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}

// ------------------------------------------------------------------------------------------------
// MvccKey
// ------------------------------------------------------------------------------------------------

/// An owned user key together with its version timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MvccKey {
    /// User key bytes.
    pub key: Vec<u8>,
    /// Version timestamp; zero for meta keys.
    pub timestamp: Timestamp,
}

impl MvccKey {
    /// Creates a timestamped version key.
    pub fn new(key: impl Into<Vec<u8>>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            timestamp,
        }
    }

    /// Creates a key without timestamp, ordered before every version of
    /// `key`.
    pub fn meta(key: impl Into<Vec<u8>>) -> Self {
        Self::new(key, Timestamp::default())
    }

    /// Returns `true` when the key carries a timestamp.
    pub fn is_value(&self) -> bool {
        !self.timestamp.is_empty()
    }

    /// Borrowed view of this key.
    pub fn as_key_ref(&self) -> MvccKeyRef<'_> {
        MvccKeyRef {
            key: &self.key,
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for MvccKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_key_ref().fmt(f)
    }
}

/// A borrowed MVCC key.
///
/// Handed out by [`SstIterator::unsafe_key`](crate::SstIterator::unsafe_key);
/// the user key points into iterator-owned memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MvccKeyRef<'a> {
    /// User key bytes.
    pub key: &'a [u8],
    /// Version timestamp; zero for meta keys.
    pub timestamp: Timestamp,
}

impl MvccKeyRef<'_> {
    /// Copies the view into an owned key.
    pub fn to_owned_key(&self) -> MvccKey {
        MvccKey {
            key: self.key.to_vec(),
            timestamp: self.timestamp,
        }
    }

    /// Returns `true` when the key carries a timestamp.
    pub fn is_value(&self) -> bool {
        !self.timestamp.is_empty()
    }
}

impl fmt::Display for MvccKeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key.escape_ascii())?;
        if self.is_value() {
            write!(f, "/{}", self.timestamp)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Codec
// ------------------------------------------------------------------------------------------------

/// Encodes `key` into a fresh buffer.
pub fn encode_key(key: &MvccKey) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_key_to(&mut buf, &key.key, key.timestamp);
    buf
}

/// Encodes a user key and timestamp into `buf`, replacing its contents.
///
/// Reuses the buffer's capacity, which lets a seeking iterator encode its
/// targets without allocating.
pub fn encode_key_to(buf: &mut Vec<u8>, key: &[u8], timestamp: Timestamp) {
    let ts_len = timestamp.encoded_len();
    buf.clear();
    buf.reserve(key.len() + SENTINEL_LEN + ts_len + 1);
    buf.extend_from_slice(key);
    if ts_len > 0 {
        buf.push(0);
        buf.extend_from_slice(&timestamp.wall_time.to_be_bytes());
        if timestamp.logical != 0 {
            buf.extend_from_slice(&timestamp.logical.to_be_bytes());
        }
        buf.push((SENTINEL_LEN + ts_len) as u8);
    } else {
        buf.push(0);
    }
}

/// Splits an encoded key into its user key and raw timestamp bytes.
///
/// The timestamp bytes exclude the sentinel and the length byte, so they are
/// empty for meta keys. Returns `None` when the length byte points outside
/// the key.
pub fn split_key(encoded: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&ts_len, _) = encoded.split_last()?;
    let ts_len = ts_len as usize;
    let key_end = encoded.len().checked_sub(1 + ts_len)?;
    let key = &encoded[..key_end];
    let ts = if ts_len > 0 {
        &encoded[key_end + 1..encoded.len() - 1]
    } else {
        &encoded[..0]
    };
    Some((key, ts))
}

/// Decodes an encoded key into its user key (borrowed from `encoded`) and
/// timestamp.
pub fn decode_key(encoded: &[u8]) -> Result<(&[u8], Timestamp), KeyError> {
    let (key, ts) =
        split_key(encoded).ok_or_else(|| KeyError::InvalidEncoding(encoded.to_vec()))?;
    let timestamp = match ts.len() {
        0 => Timestamp::default(),
        WALL_TIME_LEN => Timestamp::new(i64::from_be_bytes(wall_time_bytes(ts)), 0),
        len if len == WALL_TIME_LEN + LOGICAL_LEN => {
            let mut logical = [0u8; LOGICAL_LEN];
            logical.copy_from_slice(&ts[WALL_TIME_LEN..]);
            Timestamp::new(
                i64::from_be_bytes(wall_time_bytes(ts)),
                i32::from_be_bytes(logical),
            )
        }
        len => {
            return Err(KeyError::InvalidTimestampLength {
                len,
                key: encoded.to_vec(),
            });
        }
    };
    Ok((key, timestamp))
}

/// First eight bytes of a timestamp section whose length was already checked.
fn wall_time_bytes(ts: &[u8]) -> [u8; WALL_TIME_LEN] {
    let mut wall = [0u8; WALL_TIME_LEN];
    wall.copy_from_slice(&ts[..WALL_TIME_LEN]);
    wall
}
