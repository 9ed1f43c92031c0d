//! Read-only MVCC iterator over a single SSTable.
//!
//! [`SstIterator`] wraps an opaque [`TableReader`] sorted by the
//! [`MvccComparator`] and turns its raw internal keys back into
//! [`MvccKey`]s.
//!
//! # Lifecycle
//!
//! ```text
//! open / open_mem ──► seek(target) ──► (next | next_key)* ──► close
//! ```
//!
//! A freshly opened iterator is not positioned; [`valid`](SstIterator::valid)
//! returns `Ok(false)` until the first [`seek`](SstIterator::seek).
//! [`close`](SstIterator::close) consumes the iterator.
//!
//! # Decode pipeline
//!
//! Every step that lands on a raw entry runs, in order:
//!
//! 1. the key must be at least [`TRAILER_LEN`] bytes long;
//! 2. the trailer's value-type tag must be [`ValueType::Value`]; tables are
//!    produced by a writer that emits plain values only, so anything else
//!    (deletions, merges, range deletions) is rejected;
//! 3. the key without its trailer must decode as an MVCC key;
//! 4. with value verification on, the raw value's checksum header must
//!    match the decoded user key.
//!
//! The first failure puts the iterator in a terminal failed state: `valid`
//! returns the same error until the iterator is closed, and movement calls
//! are ignored. Reaching the end of the table is not an error.
//!
//! The comparator and the pipeline disagree on purpose about undecodable
//! keys: the comparator falls back to byte order so the table's search
//! structure always sees a total order, while the pipeline refuses to hand
//! such a key to the caller.
//!
//! # Zero-copy views
//!
//! [`unsafe_key`](SstIterator::unsafe_key) and
//! [`unsafe_value`](SstIterator::unsafe_value) borrow from the underlying
//! table image. The borrow ends at the next call that takes `&mut self`;
//! callers that keep entries must copy them
//! ([`MvccKeyRef::to_owned_key`], `to_vec`).

#[cfg(test)]
mod tests;

use std::{io::Write, path::Path, sync::Arc};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::comparator::MvccComparator;
use crate::mvcc::{
    KeyError, MvccKey, MvccKeyRef, Timestamp, ValueError, decode_key, encode_key_to, value,
};
use crate::sstable::internal_key::parse_internal_key;
use crate::sstable::{
    MemFs, ReadOptions, SSTable, TRAILER_LEN, TableCursor, TableError, TableOptions, TableReader,
    ValueType,
};

/// File name an in-memory image is materialized under.
const MEM_SST_FILE_NAME: &str = "data.sst";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors reported by [`SstIterator`].
///
/// Cloneable so the sticky error can be returned by every
/// [`valid`](SstIterator::valid) call.
#[derive(Debug, Clone, Error)]
pub enum SstIterError {
    /// Opening or materializing the table image failed.
    #[error("opening sstable: {0}")]
    Open(#[source] Arc<TableError>),

    /// A raw key was too short to carry a trailer.
    #[error("invalid internal key: {key:02x?}")]
    MalformedTrailer {
        /// The raw key.
        key: Vec<u8>,
    },

    /// A raw key's trailer carried a tag other than a plain value.
    #[error("value type not supported: {0}")]
    UnsupportedValueType(u8),

    /// The key without trailer is not a valid MVCC key.
    #[error("decoding key {key:02x?}: {source}")]
    DecodeKey {
        /// The key without trailer.
        key: Vec<u8>,
        /// Codec failure.
        #[source]
        source: KeyError,
    },

    /// Value verification failed.
    #[error("verifying value: {0}")]
    Verify(#[from] ValueError),

    /// Releasing the underlying cursor or table failed.
    #[error("{context}: {source}")]
    Close {
        /// What was being closed.
        context: &'static str,
        /// Engine failure.
        #[source]
        source: Arc<TableError>,
    },
}

impl SstIterError {
    fn close(context: &'static str, source: TableError) -> Self {
        Self::Close {
            context,
            source: Arc::new(source),
        }
    }
}

impl From<TableError> for SstIterError {
    fn from(err: TableError) -> Self {
        Self::Open(Arc::new(err))
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Options for an [`SstIterator`].
#[derive(Debug, Clone, Copy)]
pub struct IterOptions {
    /// Verify each value's checksum header against its key.
    ///
    /// Default: `false`.
    pub verify_values: bool,

    /// Verify the CRC32 of every data block the cursor loads.
    ///
    /// Default: `true`.
    pub verify_checksums: bool,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            verify_values: false,
            verify_checksums: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator contract
// ------------------------------------------------------------------------------------------------

/// Forward iteration over MVCC entries.
///
/// Views returned by [`unsafe_key`](Self::unsafe_key) and
/// [`unsafe_value`](Self::unsafe_value) are valid until the next movement.
pub trait SimpleIterator {
    /// Positions at the first entry not less than `target`.
    fn seek(&mut self, target: &MvccKey);

    /// `Ok(true)` when positioned at an entry; the sticky error otherwise.
    fn valid(&self) -> Result<bool, SstIterError>;

    /// Advances to the next entry.
    fn next(&mut self);

    /// Advances past every remaining version of the current user key.
    fn next_key(&mut self);

    /// Current key.
    fn unsafe_key(&self) -> MvccKeyRef<'_>;

    /// Current raw value.
    fn unsafe_value(&self) -> &[u8];
}

// ------------------------------------------------------------------------------------------------
// SstIterator
// ------------------------------------------------------------------------------------------------

/// Position of an [`SstIterator`].
#[derive(Debug, Clone)]
enum IterState {
    /// Opened, never seeked.
    Fresh,
    /// At a decoded plain-value entry.
    Valid,
    /// Past the last entry.
    Exhausted,
    /// Stopped on an error; absorbing until close.
    Failed(SstIterError),
}

/// MVCC iterator over one SSTable. See the [module docs](self).
pub struct SstIterator {
    reader: Box<dyn TableReader>,
    cursor: Option<Box<dyn TableCursor>>,
    options: IterOptions,
    state: IterState,

    /// Length of the user key at the front of the cursor's current key.
    user_key_len: usize,
    timestamp: Timestamp,

    /// Reused encoding buffer for seek targets.
    seek_key: Vec<u8>,
    /// Reused snapshot of the user key `next_key` skips.
    next_key_start: Vec<u8>,

    /// Keeps the in-memory file system of `open_mem` alive.
    _mem_fs: Option<MemFs>,
}

impl SstIterator {
    /// Opens the table file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstIterError> {
        Self::open_with(path, IterOptions::default())
    }

    /// Opens the table file at `path` with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: IterOptions) -> Result<Self, SstIterError> {
        let path = path.as_ref();
        let sst = SSTable::open(path, mvcc_table_options())?;
        debug!(path = %path.display(), size = sst.file_size(), "opened sst iterator");
        Ok(Self::from_reader(Box::new(sst), options))
    }

    /// Opens a table image held in memory.
    ///
    /// The bytes are written into a private in-memory file system and read
    /// back from there. With `verify` set, every value's checksum is checked
    /// as the iterator reaches it.
    pub fn open_mem(data: &[u8], verify: bool) -> Result<Self, SstIterError> {
        let options = IterOptions {
            verify_values: verify,
            ..IterOptions::default()
        };
        let fs = MemFs::new();
        let mut file = fs.create(MEM_SST_FILE_NAME).map_err(TableError::from)?;
        file.write_all(data).map_err(TableError::from)?;
        file.close().map_err(TableError::from)?;

        let sst = SSTable::open_in(&fs, MEM_SST_FILE_NAME, mvcc_table_options())?;
        debug!(size = data.len(), verify, "opened in-memory sst iterator");
        let mut iter = Self::from_reader(Box::new(sst), options);
        iter._mem_fs = Some(fs);
        Ok(iter)
    }

    /// Wraps an already open reader. The reader must order keys with
    /// [`MvccComparator`].
    pub fn from_reader(reader: Box<dyn TableReader>, options: IterOptions) -> Self {
        Self {
            reader,
            cursor: None,
            options,
            state: IterState::Fresh,
            user_key_len: 0,
            timestamp: Timestamp::default(),
            seek_key: Vec::new(),
            next_key_start: Vec::new(),
            _mem_fs: None,
        }
    }

    /// Positions at the first entry not less than `target` and decodes it.
    ///
    /// Resets any previous position. Does nothing once the iterator has
    /// failed.
    pub fn seek(&mut self, target: &MvccKey) {
        if matches!(self.state, IterState::Failed(_)) {
            return;
        }
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                self.fail(SstIterError::close("resetting sstable iterator", e));
                return;
            }
        }

        trace!(key = %target, "seek");
        encode_key_to(&mut self.seek_key, &target.key, target.timestamp);
        let read_options = ReadOptions {
            verify_checksums: self.options.verify_checksums,
        };
        self.cursor = Some(self.reader.find(&self.seek_key, &read_options));
        self.step();
    }

    /// `Ok(true)` at a decoded entry, `Ok(false)` before the first seek or
    /// past the end, and the sticky error after a failure.
    pub fn valid(&self) -> Result<bool, SstIterError> {
        match &self.state {
            IterState::Valid => Ok(true),
            IterState::Fresh | IterState::Exhausted => Ok(false),
            IterState::Failed(err) => Err(err.clone()),
        }
    }

    /// Advances to the next entry. Ignored unless positioned at one.
    pub fn next(&mut self) {
        if matches!(self.state, IterState::Valid) {
            self.step();
        }
    }

    /// Skips the remaining versions of the current user key.
    ///
    /// Lands on the next distinct user key, the end of the table, or the
    /// first entry that fails to decode. The current user key is kept in a
    /// single reused buffer, however long the version chain is.
    pub fn next_key(&mut self) {
        if !matches!(self.state, IterState::Valid) {
            return;
        }
        let Some(cursor) = self.cursor.as_deref() else {
            return;
        };
        self.next_key_start.clear();
        self.next_key_start
            .extend_from_slice(&cursor.key()[..self.user_key_len]);

        let mut skipped = 0usize;
        loop {
            self.step();
            if !matches!(self.state, IterState::Valid)
                || self.current_user_key() != self.next_key_start.as_slice()
            {
                break;
            }
            skipped += 1;
        }
        trace!(skipped, "next_key");
    }

    /// Current key, borrowed from the table image.
    ///
    /// Empty unless [`valid`](Self::valid) returns `Ok(true)`.
    pub fn unsafe_key(&self) -> MvccKeyRef<'_> {
        match self.state {
            IterState::Valid => MvccKeyRef {
                key: self.current_user_key(),
                timestamp: self.timestamp,
            },
            _ => MvccKeyRef::default(),
        }
    }

    /// Current raw value, borrowed from the table image.
    ///
    /// Empty unless [`valid`](Self::valid) returns `Ok(true)`.
    pub fn unsafe_value(&self) -> &[u8] {
        match (&self.state, self.cursor.as_deref()) {
            (IterState::Valid, Some(cursor)) => cursor.value(),
            _ => &[],
        }
    }

    /// Releases the cursor, then the table.
    ///
    /// Both are released even if the first fails. The cursor's error takes
    /// precedence over the table's. Errors from earlier decoding are not
    /// reported here; they were already returned by `valid`.
    pub fn close(mut self) -> Result<(), SstIterError> {
        let cursor_result = match self.cursor.take() {
            Some(mut cursor) => cursor
                .close()
                .map_err(|e| SstIterError::close("closing sstable iterator", e)),
            None => Ok(()),
        };
        let table_result = self
            .reader
            .close()
            .map_err(|e| SstIterError::close("closing sstable", e));

        if let Err(e) = &cursor_result {
            warn!(%e, "sst iterator close failed");
        }
        if let Err(e) = &table_result {
            warn!(%e, "sst table close failed");
        }
        cursor_result.and(table_result)
    }

    // --------------------------------------------------------------------------------------------
    // Decode pipeline
    // --------------------------------------------------------------------------------------------

    /// Advances the raw cursor by one entry and decodes it.
    fn step(&mut self) {
        let Some(cursor) = self.cursor.as_deref_mut() else {
            return;
        };
        if !cursor.next() {
            self.state = IterState::Exhausted;
            self.user_key_len = 0;
            self.timestamp = Timestamp::default();
            return;
        }

        match decode_entry(cursor.key(), cursor.value(), self.options.verify_values) {
            Ok((user_key_len, timestamp)) => {
                self.user_key_len = user_key_len;
                self.timestamp = timestamp;
                self.state = IterState::Valid;
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, err: SstIterError) {
        warn!(%err, "sst iterator failed");
        self.state = IterState::Failed(err);
        self.user_key_len = 0;
        self.timestamp = Timestamp::default();
    }

    fn current_user_key(&self) -> &[u8] {
        match (&self.state, self.cursor.as_deref()) {
            (IterState::Valid, Some(cursor)) => &cursor.key()[..self.user_key_len],
            _ => &[],
        }
    }
}

/// Validates one raw entry and returns the user key length and timestamp.
fn decode_entry(
    raw_key: &[u8],
    raw_value: &[u8],
    verify: bool,
) -> Result<(usize, Timestamp), SstIterError> {
    let Some(parsed) = parse_internal_key(raw_key) else {
        return Err(SstIterError::MalformedTrailer {
            key: raw_key.to_vec(),
        });
    };
    if parsed.tag != ValueType::Value as u8 {
        return Err(SstIterError::UnsupportedValueType(parsed.tag));
    }

    let encoded = parsed.user_portion;
    debug_assert_eq!(encoded.len() + TRAILER_LEN, raw_key.len());
    let (user_key, timestamp) = decode_key(encoded).map_err(|source| SstIterError::DecodeKey {
        key: encoded.to_vec(),
        source,
    })?;

    if verify {
        value::verify(user_key, raw_value)?;
    }
    Ok((user_key.len(), timestamp))
}

fn mvcc_table_options() -> TableOptions {
    TableOptions {
        comparator: Arc::new(MvccComparator),
    }
}

impl SimpleIterator for SstIterator {
    fn seek(&mut self, target: &MvccKey) {
        SstIterator::seek(self, target)
    }

    fn valid(&self) -> Result<bool, SstIterError> {
        SstIterator::valid(self)
    }

    fn next(&mut self) {
        SstIterator::next(self)
    }

    fn next_key(&mut self) {
        SstIterator::next_key(self)
    }

    fn unsafe_key(&self) -> MvccKeyRef<'_> {
        SstIterator::unsafe_key(self)
    }

    fn unsafe_value(&self) -> &[u8] {
        SstIterator::unsafe_value(self)
    }
}
