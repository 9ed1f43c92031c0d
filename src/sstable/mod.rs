//! Sorted String Table (SSTable) reader.
//!
//! This module implements the sorted-table engine the MVCC iterator reads
//! through. Tables are **immutable** byte images (memory-mapped files or
//! in-memory buffers) holding internal keys in the order of a pluggable
//! [`Comparator`].
//!
//! The engine is exposed to the rest of the crate only through two traits:
//!
//! - [`TableReader`]: an open table; [`find`](TableReader::find) returns a
//!   cursor positioned before the first entry not less than a target.
//! - [`TableCursor`]: a forward cursor over raw `(key, value)` entries.
//!
//! [`SSTable`] and [`SSTableCursor`] are the implementations for the format
//! below; tests substitute their own doubles.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Header**: magic, version and CRC32 of both.
//! - **Data blocks**: concatenated cells `[KEY_LEN u32][VALUE_LEN u32][KEY][VALUE]`.
//! - **Properties block**: comparator name and entry counts.
//! - **Metaindex block**: named handles of the meta blocks.
//! - **Index block**: first internal key and handle of every data block.
//! - **Footer**: metaindex and index handles, file size, CRC32.
//!
//! # Key order
//!
//! Stored keys are internal keys (see [`internal_key`]). The reader orders
//! them by the comparator applied to their user portion; the trailer never
//! takes part in a search. `find` targets are user-portion keys.
//!
//! # Errors
//!
//! Structural blocks are verified when the table is opened, so a corrupt
//! header, footer, index or properties block fails [`SSTable::open`].
//! Data blocks are read lazily: a cursor that hits a corrupt data block
//! stops and reports the failure from [`TableCursor::close`].

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod builder;
pub mod cursor;
pub mod internal_key;
pub mod vfs;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports: public API surface
// ------------------------------------------------------------------------------------------------

pub use cursor::SSTableCursor;
pub use internal_key::{TRAILER_LEN, ValueType};
pub use vfs::{DiskFs, FileSystem, MemFile, MemFs, TableSource};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{fmt, io, ops::Range, path::Path, sync::Arc};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::debug;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SST_HDR_MAGIC: [u8; 4] = *b"SST1";
const SST_HDR_VERSION: u32 = 1;
const SST_HDR_SIZE: usize = 12;
const SST_FOOTER_SIZE: usize = 44;
const SST_BLOCK_LEN_SIZE: usize = 4;
const SST_BLOCK_CHECKSUM_SIZE: usize = 4;
const SST_META_PROPERTIES: &str = "meta.properties";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the table engine.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural block could not be decoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Block or header checksum mismatch.
    #[error("Checksum mismatch at offset {offset}")]
    ChecksumMismatch {
        /// File offset of the failing block.
        offset: usize,
    },

    /// The table was sorted by a different comparator.
    #[error("Comparator mismatch: table uses {found:?}, reader uses {expected:?}")]
    ComparatorMismatch {
        /// Name of the comparator installed in the reader.
        expected: String,
        /// Name recorded in the table.
        found: String,
    },

    /// Malformed table structure.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The reader or cursor was already closed.
    #[error("Already closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Options fixed when a table is opened.
#[derive(Clone)]
pub struct TableOptions {
    /// Order the table was written with. Its name must match the table's.
    pub comparator: Arc<dyn Comparator>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
        }
    }
}

impl fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOptions")
            .field("comparator", &self.comparator.name())
            .finish()
    }
}

/// Per-cursor read options.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Verify the CRC32 of every data block the cursor loads.
    ///
    /// Default: `true`.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Capability traits
// ------------------------------------------------------------------------------------------------

/// An open sorted table.
pub trait TableReader: Send {
    /// Returns a cursor positioned just before the first entry whose key is
    /// not less than `key`. The first [`TableCursor::next`] moves onto it.
    ///
    /// Errors are deferred to the cursor's [`close`](TableCursor::close).
    fn find(&self, key: &[u8], opts: &ReadOptions) -> Box<dyn TableCursor>;

    /// Releases the table.
    fn close(&mut self) -> Result<(), TableError>;
}

/// Forward cursor over raw table entries.
pub trait TableCursor: Send {
    /// Advances to the next entry. Returns `false` when exhausted or failed.
    fn next(&mut self) -> bool;

    /// Current raw key. Valid only after `next` returned `true`.
    fn key(&self) -> &[u8];

    /// Current raw value. Valid only after `next` returned `true`.
    fn value(&self) -> &[u8];

    /// Releases the cursor and reports any error it stopped on.
    fn close(&mut self) -> Result<(), TableError>;
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// Table file header.
#[derive(Debug, Default)]
pub(crate) struct SSTableHeader {
    magic: [u8; 4],
    version: u32,
    header_crc: u32,
}

/// Offset and size of a block, including length prefix and checksum.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// Index entry pointing to a data block.
#[derive(Debug)]
pub(crate) struct SSTableIndexEntry {
    /// First internal key stored in the block.
    pub(crate) first_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

/// Named pointer to a meta block.
#[derive(Debug)]
pub(crate) struct MetaIndexEntry {
    pub(crate) name: String,
    pub(crate) handle: BlockHandle,
}

/// Table-level metadata written by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableProperties {
    /// Name of the comparator the table is sorted by.
    pub comparator_name: String,
    /// Number of entries.
    pub entry_count: u64,
    /// Number of data blocks.
    pub data_block_count: u64,
    /// Sum of raw key lengths.
    pub raw_key_size: u64,
    /// Sum of raw value lengths.
    pub raw_value_size: u64,
}

/// Table footer, stored at the very end of the file.
#[derive(Debug)]
pub(crate) struct SSTableFooter {
    pub(crate) metaindex: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) footer_crc32: u32,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for SSTableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.header_crc.encode_to(buf)
    }
}

impl Decode for SSTableHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, n1) = <[u8; 4]>::decode_from(buf)?;
        let (version, n2) = u32::decode_from(&buf[n1..])?;
        let (header_crc, n3) = u32::decode_from(&buf[n1 + n2..])?;
        Ok((
            Self {
                magic,
                version,
                header_crc,
            },
            n1 + n2 + n3,
        ))
    }
}

impl Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)
    }
}

impl Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (offset, n1) = u64::decode_from(buf)?;
        let (size, n2) = u64::decode_from(&buf[n1..])?;
        Ok((Self { offset, size }, n1 + n2))
    }
}

impl Encode for SSTableIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.first_key.encode_to(buf)?;
        self.handle.encode_to(buf)
    }
}

impl Decode for SSTableIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (first_key, n1) = <Vec<u8>>::decode_from(buf)?;
        let (handle, n2) = BlockHandle::decode_from(&buf[n1..])?;
        Ok((Self { first_key, handle }, n1 + n2))
    }
}

impl Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.handle.encode_to(buf)
    }
}

impl Decode for MetaIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (name, n1) = String::decode_from(buf)?;
        let (handle, n2) = BlockHandle::decode_from(&buf[n1..])?;
        Ok((Self { name, handle }, n1 + n2))
    }
}

impl Encode for SSTableProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.comparator_name.encode_to(buf)?;
        self.entry_count.encode_to(buf)?;
        self.data_block_count.encode_to(buf)?;
        self.raw_key_size.encode_to(buf)?;
        self.raw_value_size.encode_to(buf)
    }
}

impl Decode for SSTableProperties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (comparator_name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (data_block_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (raw_key_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (raw_value_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                comparator_name,
                entry_count,
                data_block_count,
                raw_key_size,
                raw_value_size,
            },
            off,
        ))
    }
}

impl Encode for SSTableFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.metaindex.encode_to(buf)?;
        self.index.encode_to(buf)?;
        self.total_file_size.encode_to(buf)?;
        self.footer_crc32.encode_to(buf)
    }
}

impl Decode for SSTableFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (metaindex, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                metaindex,
                index,
                total_file_size,
                footer_crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable: immutable reader
// ------------------------------------------------------------------------------------------------

/// State shared between a table and its cursors.
pub(crate) struct TableShared {
    pub(crate) name: String,
    pub(crate) source: TableSource,
    pub(crate) comparator: Arc<dyn Comparator>,
    pub(crate) properties: SSTableProperties,
    pub(crate) index: Vec<SSTableIndexEntry>,
}

/// An open, immutable table image.
pub struct SSTable {
    shared: Arc<TableShared>,
    closed: bool,
}

impl SSTable {
    /// Memory-maps and opens the table file at `path`.
    pub fn open(path: impl AsRef<Path>, options: TableOptions) -> Result<Self, TableError> {
        Self::open_in(&DiskFs, path, options)
    }

    /// Opens `path` through the given file system.
    pub fn open_in(
        fs: &dyn FileSystem,
        path: impl AsRef<Path>,
        options: TableOptions,
    ) -> Result<Self, TableError> {
        let path = path.as_ref();
        let source = fs.open(path)?;
        Self::from_source(path.display().to_string(), source, options)
    }

    /// Parses and verifies the structural blocks of `source`.
    ///
    /// # Errors
    ///
    /// - [`TableError::ChecksumMismatch`] if the header, footer or a meta
    ///   block fails its CRC.
    /// - [`TableError::ComparatorMismatch`] if the table was written with a
    ///   differently named comparator.
    /// - [`TableError::Corruption`] for bad magic/version, a truncated file,
    ///   out-of-range handles or a missing properties block.
    pub fn from_source(
        name: String,
        source: TableSource,
        options: TableOptions,
    ) -> Result<Self, TableError> {
        let file_len = source.len();
        if file_len < SST_HDR_SIZE + SST_FOOTER_SIZE {
            return Err(TableError::Corruption(format!(
                "file too small: {file_len} bytes"
            )));
        }

        let (mut header, _) = encoding::decode_from_slice::<SSTableHeader>(&source[..SST_HDR_SIZE])?;
        let stored = header.header_crc;
        header.header_crc = 0;
        if crc32(&encoding::encode_to_vec(&header)?) != stored {
            return Err(TableError::ChecksumMismatch { offset: 0 });
        }
        if header.magic != SST_HDR_MAGIC {
            return Err(TableError::Corruption("header magic mismatch".into()));
        }
        if header.version != SST_HDR_VERSION {
            return Err(TableError::Corruption(format!(
                "unsupported version {}",
                header.version
            )));
        }

        let footer_start = file_len - SST_FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<SSTableFooter>(&source[footer_start..])?;
        let stored = footer.footer_crc32;
        footer.footer_crc32 = 0;
        if crc32(&encoding::encode_to_vec(&footer)?) != stored {
            return Err(TableError::ChecksumMismatch {
                offset: footer_start,
            });
        }
        if footer.total_file_size != file_len as u64 {
            return Err(TableError::Corruption(format!(
                "footer records {} bytes, file has {file_len}",
                footer.total_file_size
            )));
        }

        let metaindex = block_content(&source, &footer.metaindex, true)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&source[metaindex])?;

        let mut properties_handle = None;
        for entry in meta_entries {
            match entry.name.as_str() {
                SST_META_PROPERTIES => properties_handle = Some(entry.handle),
                other => {
                    return Err(TableError::Corruption(format!(
                        "unexpected metaindex entry {other:?}"
                    )));
                }
            }
        }
        let Some(properties_handle) = properties_handle else {
            return Err(TableError::Corruption("missing properties block".into()));
        };
        let range = block_content(&source, &properties_handle, true)?;
        let (properties, _) = encoding::decode_from_slice::<SSTableProperties>(&source[range])?;

        let expected = options.comparator.name();
        if properties.comparator_name != expected {
            return Err(TableError::ComparatorMismatch {
                expected: expected.to_string(),
                found: properties.comparator_name,
            });
        }

        let range = block_content(&source, &footer.index, true)?;
        let (index, _) = encoding::decode_vec::<SSTableIndexEntry>(&source[range])?;

        debug!(
            table = %name,
            size = file_len,
            entries = properties.entry_count,
            blocks = index.len(),
            comparator = expected,
            "opened sstable"
        );

        Ok(Self {
            shared: Arc::new(TableShared {
                name,
                source,
                comparator: options.comparator,
                properties,
                index,
            }),
            closed: false,
        })
    }

    /// Table metadata.
    pub fn properties(&self) -> &SSTableProperties {
        &self.shared.properties
    }

    /// Size of the table image in bytes.
    pub fn file_size(&self) -> u64 {
        self.shared.source.len() as u64
    }

    /// Returns a concrete cursor; see [`TableReader::find`].
    pub fn cursor(&self, key: &[u8], opts: &ReadOptions) -> SSTableCursor {
        SSTableCursor::new(Arc::clone(&self.shared), key, opts)
    }
}

impl TableReader for SSTable {
    fn find(&self, key: &[u8], opts: &ReadOptions) -> Box<dyn TableCursor> {
        Box::new(self.cursor(key, opts))
    }

    fn close(&mut self) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::Closed);
        }
        self.closed = true;
        debug!(table = %self.shared.name, "closed sstable");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Block helpers
// ------------------------------------------------------------------------------------------------

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Locates the content of the block referenced by `handle` inside `image`
/// and optionally verifies its checksum.
///
/// Returns the content's byte range so callers can borrow it in place.
pub(crate) fn block_content(
    image: &[u8],
    handle: &BlockHandle,
    verify_checksum: bool,
) -> Result<Range<usize>, TableError> {
    let out_of_range = || TableError::Corruption(format!("block {handle:?} out of range"));
    let start = usize::try_from(handle.offset).map_err(|_| out_of_range())?;
    let size = usize::try_from(handle.size).map_err(|_| out_of_range())?;
    let end = start.checked_add(size).ok_or_else(out_of_range)?;
    if end > image.len() || size < SST_BLOCK_LEN_SIZE + SST_BLOCK_CHECKSUM_SIZE {
        return Err(out_of_range());
    }

    let (content_len, _) = u32::decode_from(&image[start..])?;
    let content_start = start + SST_BLOCK_LEN_SIZE;
    let content_end = content_start + content_len as usize;
    if content_end + SST_BLOCK_CHECKSUM_SIZE != end {
        return Err(TableError::Corruption(format!(
            "block at offset {start} has inconsistent length {content_len}"
        )));
    }

    if verify_checksum {
        let (stored, _) = u32::decode_from(&image[content_end..])?;
        if crc32(&image[content_start..content_end]) != stored {
            return Err(TableError::ChecksumMismatch { offset: start });
        }
    }

    Ok(content_start..content_end)
}
