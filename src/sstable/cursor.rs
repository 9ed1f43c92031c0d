//! Forward cursor over the data blocks of an [`SSTable`](super::SSTable).
//!
//! A cursor walks data blocks in index order and parses cells in place:
//!
//! ```text
//! [KEY_LEN u32][VALUE_LEN u32][KEY_BYTES][VALUE_BYTES]
//! ```
//!
//! Keys and values are never copied; [`key`](TableCursor::key) and
//! [`value`](TableCursor::value) borrow from the table image, which the
//! cursor keeps alive through a shared handle.
//!
//! Positioning is a binary search over the index followed by a linear scan
//! inside the chosen block. A corrupt block stops the cursor; the error is
//! kept and returned by [`close`](TableCursor::close).

use std::{ops::Range, sync::Arc};

use tracing::warn;

use crate::encoding::{Decode, require};

use super::{
    ReadOptions, SST_BLOCK_LEN_SIZE, TableCursor, TableError, TableShared, block_content,
    internal_key::user_portion,
};

const CELL_HEADER_SIZE: usize = 2 * SST_BLOCK_LEN_SIZE;

/// Location of one parsed cell inside the table image.
struct Cell {
    key: Range<usize>,
    value: Range<usize>,
    next: usize,
}

/// Cursor implementation for [`SSTable`](super::SSTable).
pub struct SSTableCursor {
    table: Arc<TableShared>,
    verify_checksums: bool,

    /// Index entry of the loaded block.
    block_index: usize,
    /// Absolute offset of the next cell to parse.
    offset: usize,
    /// Absolute end of the loaded block's content.
    block_end: usize,

    key: Range<usize>,
    value: Range<usize>,

    exhausted: bool,
    closed: bool,
    err: Option<TableError>,
}

impl SSTableCursor {
    pub(crate) fn new(table: Arc<TableShared>, target: &[u8], opts: &ReadOptions) -> Self {
        let mut cursor = Self {
            table,
            verify_checksums: opts.verify_checksums,
            block_index: 0,
            offset: 0,
            block_end: 0,
            key: 0..0,
            value: 0..0,
            exhausted: false,
            closed: false,
            err: None,
        };
        cursor.seek(target);
        cursor
    }

    /// Leaves `offset` at the first cell whose key is not less than `target`.
    fn seek(&mut self, target: &[u8]) {
        let table = Arc::clone(&self.table);
        let cmp = &*table.comparator;

        // First block whose first key is >= target. Earlier matches can only
        // sit in the block just before it.
        let idx = table
            .index
            .partition_point(|e| cmp.compare(user_portion(&e.first_key), target).is_lt());
        if !self.load_block(idx.saturating_sub(1)) {
            return;
        }

        loop {
            if self.offset >= self.block_end {
                if !self.load_block(self.block_index + 1) {
                    return;
                }
                continue;
            }
            let cell = match self.parse_cell() {
                Ok(cell) => cell,
                Err(e) => return self.fail(e),
            };
            let key = &table.source[cell.key];
            if cmp.compare(user_portion(key), target).is_ge() {
                return;
            }
            self.offset = cell.next;
        }
    }

    /// Loads data block `idx`. Returns `false` past the last block or on error.
    fn load_block(&mut self, idx: usize) -> bool {
        let Some(entry) = self.table.index.get(idx) else {
            self.exhausted = true;
            return false;
        };
        match block_content(&self.table.source, &entry.handle, self.verify_checksums) {
            Ok(range) => {
                self.block_index = idx;
                self.offset = range.start;
                self.block_end = range.end;
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn parse_cell(&self) -> Result<Cell, TableError> {
        let data = &self.table.source[..self.block_end];
        let at = self.offset;
        require(&data[at..], CELL_HEADER_SIZE)?;
        let (key_len, _) = u32::decode_from(&data[at..])?;
        let (value_len, _) = u32::decode_from(&data[at + SST_BLOCK_LEN_SIZE..])?;

        let key_start = at + CELL_HEADER_SIZE;
        let value_start = key_start + key_len as usize;
        let next = value_start + value_len as usize;
        if next > self.block_end {
            return Err(TableError::Corruption(format!(
                "cell at offset {at} overruns block {}",
                self.block_index
            )));
        }
        Ok(Cell {
            key: key_start..value_start,
            value: value_start..next,
            next,
        })
    }

    fn fail(&mut self, err: TableError) {
        warn!(table = %self.table.name, block = self.block_index, %err, "sstable cursor stopped");
        self.err = Some(err);
        self.exhausted = true;
        self.key = 0..0;
        self.value = 0..0;
    }
}

impl TableCursor for SSTableCursor {
    fn next(&mut self) -> bool {
        if self.exhausted || self.closed {
            return false;
        }
        while self.offset >= self.block_end {
            if !self.load_block(self.block_index + 1) {
                return false;
            }
        }
        match self.parse_cell() {
            Ok(cell) => {
                self.key = cell.key;
                self.value = cell.value;
                self.offset = cell.next;
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.table.source[self.key.clone()]
    }

    fn value(&self) -> &[u8] {
        &self.table.source[self.value.clone()]
    }

    fn close(&mut self) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::Closed);
        }
        self.closed = true;
        match self.err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
