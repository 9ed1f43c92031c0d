//! Internal keys: a user-portion key followed by an 8-byte trailer.
//!
//! ```text
//! [USER_PORTION][TRAILER_LE (8 B)]
//! TRAILER = (sequence << 8) | value_type
//! ```
//!
//! The user portion is whatever the table's comparator understands; for
//! MVCC tables it is an encoded [`MvccKey`](crate::MvccKey).

/// Size of the internal-key trailer in bytes.
pub const TRAILER_LEN: usize = 8;

/// Largest sequence number that fits in the trailer.
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

/// Record kinds a writer can tag an internal key with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// Point deletion marker.
    Deletion = 0x00,
    /// Plain value.
    Value = 0x01,
    /// Merge operand.
    Merge = 0x02,
    /// Write-ahead log blob, never stored in tables.
    LogData = 0x03,
    /// Deletion that only removes a single put.
    SingleDeletion = 0x07,
    /// Range deletion.
    RangeDeletion = 0x0F,
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x00 => Ok(Self::Deletion),
            0x01 => Ok(Self::Value),
            0x02 => Ok(Self::Merge),
            0x03 => Ok(Self::LogData),
            0x07 => Ok(Self::SingleDeletion),
            0x0F => Ok(Self::RangeDeletion),
            other => Err(other),
        }
    }
}

/// An internal key split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// Key bytes before the trailer.
    pub user_portion: &'a [u8],
    /// Sequence number from the upper 56 trailer bits.
    pub sequence: u64,
    /// Raw value-type tag from the low trailer byte.
    pub tag: u8,
}

/// Splits a raw internal key. Returns `None` if it is shorter than the
/// trailer.
pub fn parse_internal_key(raw: &[u8]) -> Option<ParsedInternalKey<'_>> {
    let split = raw.len().checked_sub(TRAILER_LEN)?;
    let (user_portion, trailer) = raw.split_at(split);
    let mut bytes = [0u8; TRAILER_LEN];
    bytes.copy_from_slice(trailer);
    let (sequence, tag) = unpack_trailer(u64::from_le_bytes(bytes));
    Some(ParsedInternalKey {
        user_portion,
        sequence,
        tag,
    })
}

/// The part of `raw` that the comparator orders by.
///
/// Keys shorter than a trailer are compared whole.
pub fn user_portion(raw: &[u8]) -> &[u8] {
    match raw.len().checked_sub(TRAILER_LEN) {
        Some(split) => &raw[..split],
        None => raw,
    }
}

/// Packs a sequence number and a value-type tag.
pub fn pack_trailer(sequence: u64, tag: u8) -> u64 {
    ((sequence & MAX_SEQUENCE_NUMBER) << 8) | u64::from(tag)
}

/// Unpacks a trailer into `(sequence, tag)`.
pub fn unpack_trailer(trailer: u64) -> (u64, u8) {
    (trailer >> 8, (trailer & 0xff) as u8)
}

/// Appends a trailer to `user_portion`.
pub fn make_internal_key(user_portion: &[u8], sequence: u64, tag: u8) -> Vec<u8> {
    let mut raw = Vec::with_capacity(user_portion.len() + TRAILER_LEN);
    raw.extend_from_slice(user_portion);
    raw.extend_from_slice(&pack_trailer(sequence, tag).to_le_bytes());
    raw
}
