use anyhow::{Error, Result};

use super::bitmap::bitmap_size;
use super::block::{BlockHeader, RawBlock};
use crate::common::{ColumnId, BLOCK_SIZE, MAX_COLUMNS};

const U8_SIZE: u32 = std::mem::size_of::<u8>() as u32;
const U16_SIZE: u32 = std::mem::size_of::<u16>() as u32;
const U32_SIZE: u32 = std::mem::size_of::<u32>() as u32;

/// The geometry of every block storing tuples of one schema shape.
/// Everything is derived once from the attribute sizes and never recomputed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    num_attrs: u16,
    attr_sizes: Vec<u8>,
    block_size: u32,
    // cached so the access path never has to walk attr_sizes
    tuple_size: u32,
    header_size: u32,
    num_slots: u32,
    column_offsets: Vec<u32>,
}

impl BlockLayout {
    /// Computes the layout of a block of `BLOCK_SIZE` bytes.
    /// The first attribute has to be (part of) the primary key.
    pub fn new(attr_sizes: Vec<u8>) -> Result<Self> {
        Self::with_block_size(BLOCK_SIZE, attr_sizes)
    }

    pub fn with_block_size(block_size: u32, attr_sizes: Vec<u8>) -> Result<Self> {
        if attr_sizes.is_empty() {
            return Err(Error::msg("A block layout needs at least one attribute"));
        }
        if attr_sizes.len() > MAX_COLUMNS as usize {
            return Err(Error::msg(format!(
                "A block layout supports at most {} attributes, got {}",
                MAX_COLUMNS,
                attr_sizes.len()
            )));
        }
        if let Some(column) = attr_sizes.iter().position(|&size| size == 0) {
            return Err(Error::msg(format!("Attribute {column} has a size of 0 bytes")));
        }

        let num_attrs = attr_sizes.len() as u16;
        let tuple_size = compute_tuple_size(&attr_sizes);
        let header_size = compute_header_size(num_attrs);
        if header_size >= block_size {
            return Err(Error::msg(format!(
                "A header of {header_size} bytes for {num_attrs} attributes does not fit into a block of {block_size} bytes"
            )));
        }
        let num_slots = compute_num_slots(block_size, header_size, tuple_size, num_attrs)
            .ok_or_else(|| {
                Error::msg(format!(
                    "Not a single tuple of {tuple_size} bytes fits into a block of {block_size} bytes"
                ))
            })?;
        let column_offsets = compute_column_offsets(header_size, num_slots, &attr_sizes);

        Ok(Self {
            num_attrs,
            attr_sizes,
            block_size,
            tuple_size,
            header_size,
            num_slots,
            column_offsets,
        })
    }

    /// Rebuilds the layout a block was initialized with, using only its header
    pub fn from_header(block: &RawBlock) -> Result<Self> {
        let header = BlockHeader::new(block);
        let attr_sizes = header.attr_sizes()?;
        let layout = Self::with_block_size(block.size(), attr_sizes)?;
        header.check_layout(&layout)?;
        Ok(layout)
    }

    pub fn num_attrs(&self) -> u16 {
        self.num_attrs
    }

    pub fn attr_sizes(&self) -> &[u8] {
        &self.attr_sizes
    }

    pub fn attr_size(&self, column: ColumnId) -> u8 {
        self.attr_sizes[column as usize]
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn tuple_size(&self) -> u32 {
        self.tuple_size
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// Size in bytes of the null bitmap in front of every column
    pub fn bitmap_size(&self) -> u32 {
        bitmap_size(self.num_slots)
    }

    /// Offset of the mini block of `column` from the start of the block
    pub fn column_offset(&self, column: ColumnId) -> u32 {
        self.column_offsets[column as usize]
    }

    pub fn column_offsets(&self) -> &[u32] {
        &self.column_offsets
    }

    /// Size in bytes of the mini block of `column`, i.e. its null bitmap and all of its values
    pub fn mini_block_size(&self, column: ColumnId) -> u32 {
        mini_block_size(self.num_slots, self.attr_size(column))
    }

    /// Offset of the first byte after the last mini block
    pub fn content_end(&self) -> u32 {
        let last = self.num_attrs - 1;
        self.column_offset(last) + self.mini_block_size(last)
    }
}

fn compute_tuple_size(attr_sizes: &[u8]) -> u32 {
    attr_sizes.iter().map(|&size| size as u32).sum()
}

// The header consists of:
// 1. block_id, num_records, num_slots (4 bytes each)
// 2. one offset per attribute (4 bytes each)
// 3. num_attrs (2 bytes)
// 4. one size per attribute (1 byte each)
fn compute_header_size(num_attrs: u16) -> u32 {
    let num_attrs = num_attrs as u32;
    3 * U32_SIZE + num_attrs * U32_SIZE + U16_SIZE + num_attrs * U8_SIZE
}

// Every slot costs tuple_size bytes plus one null bit per attribute.
// One slot is given up so every column's bitmap can be padded to a whole byte.
fn compute_num_slots(
    block_size: u32,
    header_size: u32,
    tuple_size: u32,
    num_attrs: u16,
) -> Option<u32> {
    let available_bits = 8 * (block_size - header_size) as u64;
    let bits_per_slot = 8 * tuple_size as u64 + num_attrs as u64;
    let num_slots = (available_bits / bits_per_slot).checked_sub(1)?;
    if num_slots == 0 {
        None
    } else {
        Some(num_slots as u32)
    }
}

fn mini_block_size(num_slots: u32, attr_size: u8) -> u32 {
    bitmap_size(num_slots) + num_slots * attr_size as u32
}

fn compute_column_offsets(header_size: u32, num_slots: u32, attr_sizes: &[u8]) -> Vec<u32> {
    let mut offset = header_size;
    attr_sizes
        .iter()
        .map(|&size| {
            let column_offset = offset;
            offset += mini_block_size(num_slots, size);
            column_offset
        })
        .collect()
}
