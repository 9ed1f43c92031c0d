//! Table writer used to produce test fixtures.
//!
//! Entries must be added in the order of the comparator whose name is
//! recorded; the builder does not check it, which lets tests write
//! deliberately malformed tables.

use crc32fast::Hasher as Crc32;

use crate::comparator::Comparator;
use crate::encoding::{self, Encode};

use super::{
    BlockHandle, MetaIndexEntry, SST_BLOCK_CHECKSUM_SIZE, SST_BLOCK_LEN_SIZE, SST_HDR_MAGIC,
    SST_HDR_VERSION, SST_META_PROPERTIES, SSTableFooter, SSTableHeader, SSTableIndexEntry,
    SSTableProperties, TableError,
};

const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Builds a complete table image in memory.
pub(crate) struct TableBuilder {
    comparator_name: String,
    block_size: usize,
    out: Vec<u8>,
    block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,
    index: Vec<SSTableIndexEntry>,
    entry_count: u64,
    raw_key_size: u64,
    raw_value_size: u64,
}

impl TableBuilder {
    pub(crate) fn new(comparator: &dyn Comparator) -> Self {
        Self::with_name(comparator.name())
    }

    pub(crate) fn with_name(comparator_name: &str) -> Self {
        Self {
            comparator_name: comparator_name.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            out: Vec::new(),
            block: Vec::new(),
            block_first_key: None,
            index: Vec::new(),
            entry_count: 0,
            raw_key_size: 0,
            raw_value_size: 0,
        }
    }

    /// Target size of a data block's content before it is cut.
    pub(crate) fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub(crate) fn add(&mut self, key: &[u8], value: &[u8]) {
        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.to_vec());
        }
        self.block.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.block.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.block.extend_from_slice(key);
        self.block.extend_from_slice(value);
        self.entry_count += 1;
        self.raw_key_size += key.len() as u64;
        self.raw_value_size += value.len() as u64;

        if self.block.len() >= self.block_size {
            self.flush_block();
        }
    }

    pub(crate) fn finish(mut self) -> Result<Vec<u8>, TableError> {
        let mut header = SSTableHeader {
            magic: SST_HDR_MAGIC,
            version: SST_HDR_VERSION,
            header_crc: 0,
        };
        header.header_crc = crc32(&encoding::encode_to_vec(&header)?);
        let mut image = encoding::encode_to_vec(&header)?;

        self.flush_block();
        // Data block handles were recorded relative to the data section.
        for entry in &mut self.index {
            entry.handle.offset += image.len() as u64;
        }
        image.append(&mut self.out);

        let properties = SSTableProperties {
            comparator_name: self.comparator_name,
            entry_count: self.entry_count,
            data_block_count: self.index.len() as u64,
            raw_key_size: self.raw_key_size,
            raw_value_size: self.raw_value_size,
        };
        let properties = write_block(&mut image, &encoding::encode_to_vec(&properties)?);

        let mut metaindex_bytes = Vec::new();
        encoding::encode_vec(
            &[MetaIndexEntry {
                name: SST_META_PROPERTIES.to_string(),
                handle: properties,
            }],
            &mut metaindex_bytes,
        )?;
        let metaindex = write_block(&mut image, &metaindex_bytes);

        let mut index_bytes = Vec::new();
        encoding::encode_vec(&self.index, &mut index_bytes)?;
        let index = write_block(&mut image, &index_bytes);

        let mut footer = SSTableFooter {
            metaindex,
            index,
            total_file_size: 0,
            footer_crc32: 0,
        };
        footer.total_file_size = (image.len() + encoding::encode_to_vec(&footer)?.len()) as u64;
        footer.footer_crc32 = crc32(&encoding::encode_to_vec(&footer)?);
        footer.encode_to(&mut image)?;
        Ok(image)
    }

    fn flush_block(&mut self) {
        let Some(first_key) = self.block_first_key.take() else {
            return;
        };
        let handle = write_block(&mut self.out, &self.block);
        self.block.clear();
        self.index.push(SSTableIndexEntry { first_key, handle });
    }
}

/// Appends `[len_le][content][crc32_le]` and returns its handle.
fn write_block(out: &mut Vec<u8>, content: &[u8]) -> BlockHandle {
    let offset = out.len() as u64;
    out.extend_from_slice(&(content.len() as u32).to_le_bytes());
    out.extend_from_slice(content);
    out.extend_from_slice(&crc32(content).to_le_bytes());
    BlockHandle {
        offset,
        size: (SST_BLOCK_LEN_SIZE + content.len() + SST_BLOCK_CHECKSUM_SIZE) as u64,
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
