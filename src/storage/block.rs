//! Physical format of a block.
//!
//! Block header layout (all multi-byte fields big endian):
//! ```text
//! ---------------------------------------------------------------------
//! | block_id | num_records | num_slots | attr_offsets[num_attrs]      | 32-bit fields
//! ---------------------------------------------------------------------
//! | num_attrs (16-bit) | attr_sizes[num_attrs] (8-bit) |  ...content  |
//! ---------------------------------------------------------------------
//! ```
//! Except for num_records, every header field is written once by [`initialize_raw_block`]
//! and immutable afterwards. The content is made up of one mini block per attribute, back to back:
//! ```text
//! ----------------------------------------------------
//! | null bitmap (padded to byte) | val1 | val2 | ... |
//! ----------------------------------------------------
//! ```
//! A bit value of 0 in the null bitmap means null.

use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Error, Result};

use super::common::{Deserializer, Serializer};
use super::layout::BlockLayout;
use crate::common::{BlockId, ColumnId, INVALID_BLOCK_ID};

const BLOCK_ID_OFFSET: usize = 0;
const NUM_RECORDS_OFFSET: usize = 4;
const NUM_SLOTS_OFFSET: usize = 8;
const ATTR_OFFSETS_START: usize = 12;
// header without any attribute: three 32-bit fields and num_attrs
const FIXED_HEADER_SIZE: usize = 14;
// header of a single attribute
const MIN_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 5;

/// A fixed-size piece of memory as handed out by the block store.
/// Every byte is an atomic, so a block can be shared between threads that
/// flip null bits and write attributes at the same time.
pub struct RawBlock {
    data: Box<[AtomicU8]>,
}

impl RawBlock {
    /// Allocates a new block of `size` bytes, all set to 0
    pub fn zeroed(size: u32) -> Self {
        let data = (0..size).map(|_| AtomicU8::new(0)).collect();
        Self { data }
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn bytes(&self) -> &[AtomicU8] {
        &self.data
    }

    /// Returns `len` bytes starting at `offset`
    pub fn range(&self, offset: u32, len: u32) -> &[AtomicU8] {
        &self.data[offset as usize..(offset + len) as usize]
    }

    pub fn is_zeroed(&self) -> bool {
        self.data.iter().all(|byte| byte.load(Ordering::Relaxed) == 0)
    }

    /// Resets every byte to 0, so the block can be initialized again
    pub fn zero(&mut self) {
        for byte in self.data.iter_mut() {
            *byte.get_mut() = 0;
        }
    }
}

/// Turns zeroed memory into a block conforming to `layout`.
/// Writes the header and divides the content into mini blocks. All attributes of all slots are null afterwards.
/// The block has to be zeroed (as handed out by the block store), at least `layout.block_size()` bytes long
/// and `id` must not be [`INVALID_BLOCK_ID`]. None of these are checked in release builds.
pub fn initialize_raw_block(raw: &mut RawBlock, layout: &BlockLayout, id: BlockId) {
    debug_assert!(id != INVALID_BLOCK_ID, "Block id {id} is reserved");
    debug_assert!(
        raw.size() >= layout.block_size(),
        "Block of {} bytes is smaller than the layout's {} bytes",
        raw.size(),
        layout.block_size()
    );
    debug_assert!(raw.is_zeroed(), "Block {id} was not zeroed before initialization");

    let mut serializer = Serializer::new(raw.bytes());
    serializer.serialize_u32(id);
    // num_records stays 0
    serializer.serialize_u32(0);
    serializer.serialize_u32(layout.num_slots());
    for &offset in layout.column_offsets() {
        serializer.serialize_u32(offset);
    }
    serializer.serialize_u16(layout.num_attrs());
    for &size in layout.attr_sizes() {
        serializer.serialize_u8(size);
    }
    debug_assert_eq!(serializer.end(), layout.header_size() as usize);

    tracing::debug!(
        "Initialized block {} with {} attributes and {} slots",
        id,
        layout.num_attrs(),
        layout.num_slots()
    );
}

/// Read access to the header of an initialized block
#[derive(Clone, Copy)]
pub struct BlockHeader<'a> {
    block: &'a RawBlock,
}

impl<'a> BlockHeader<'a> {
    pub fn new(block: &'a RawBlock) -> Self {
        Self { block }
    }

    fn read_u32(&self, pos: usize) -> u32 {
        Deserializer::at(self.block.bytes(), pos).deserialize_u32()
    }

    pub fn block_id(&self) -> BlockId {
        self.read_u32(BLOCK_ID_OFFSET)
    }

    pub fn num_records(&self) -> u32 {
        self.read_u32(NUM_RECORDS_OFFSET)
    }

    /// Overwrites the record count. This is bookkeeping for the layers above and not atomic:
    /// concurrent writers have to coordinate themselves.
    pub fn set_num_records(&self, num_records: u32) {
        Serializer::at(self.block.bytes(), NUM_RECORDS_OFFSET).serialize_u32(num_records);
    }

    pub fn num_slots(&self) -> u32 {
        self.read_u32(NUM_SLOTS_OFFSET)
    }

    pub fn attr_offset(&self, column: ColumnId) -> u32 {
        self.read_u32(ATTR_OFFSETS_START + column as usize * 4)
    }

    /// Number of attributes, derived from where the first mini block starts.
    /// Returns an error if the header does not describe a valid geometry, e.g. because the block
    /// was never initialized.
    pub fn num_attrs(&self) -> Result<u16> {
        if (self.block.size() as usize) < MIN_HEADER_SIZE {
            return Err(Error::msg(format!(
                "Block of {} bytes is too small to hold a header",
                self.block.size()
            )));
        }
        // the first mini block starts right after the header, which is 14 + 5 * num_attrs bytes long
        let header_size = self.attr_offset(0) as usize;
        if header_size < MIN_HEADER_SIZE
            || (header_size - FIXED_HEADER_SIZE) % 5 != 0
            || header_size > self.block.size() as usize
        {
            return Err(Error::msg(format!(
                "Block {} has no valid header, its first attribute starts at {}",
                self.block_id(),
                header_size
            )));
        }
        let derived = (header_size - FIXED_HEADER_SIZE) / 5;
        let stored =
            Deserializer::at(self.block.bytes(), num_attrs_pos(derived)).deserialize_u16();
        if stored as usize != derived {
            return Err(Error::msg(format!(
                "Block {} stores {} attributes, but its header is sized for {}",
                self.block_id(),
                stored,
                derived
            )));
        }
        Ok(stored)
    }

    /// Sizes of all attributes, in storage order
    pub fn attr_sizes(&self) -> Result<Vec<u8>> {
        let num_attrs = self.num_attrs()?;
        Ok(self.read_attr_sizes(num_attrs))
    }

    fn read_attr_sizes(&self, num_attrs: u16) -> Vec<u8> {
        let mut sizes = vec![0u8; num_attrs as usize];
        Deserializer::at(self.block.bytes(), num_attrs_pos(num_attrs as usize) + 2)
            .copy_bytes(&mut sizes);
        sizes
    }

    /// Compares the geometry stored in this header with `layout`.
    /// Returns an error describing the first field that differs.
    pub fn check_layout(&self, layout: &BlockLayout) -> Result<()> {
        let block_id = self.block_id();
        if self.num_slots() != layout.num_slots() {
            return Err(Error::msg(format!(
                "Block {} has {} slots, but its layout expects {}",
                block_id,
                self.num_slots(),
                layout.num_slots()
            )));
        }
        let num_attrs = self.num_attrs()?;
        if num_attrs != layout.num_attrs() {
            return Err(Error::msg(format!(
                "Block {} has {} attributes, but its layout expects {}",
                block_id,
                num_attrs,
                layout.num_attrs()
            )));
        }
        let sizes = self.read_attr_sizes(num_attrs);
        for column in 0..num_attrs {
            if sizes[column as usize] != layout.attr_size(column) {
                return Err(Error::msg(format!(
                    "Attribute {} of block {} is {} bytes wide, but its layout expects {}",
                    column,
                    block_id,
                    sizes[column as usize],
                    layout.attr_size(column)
                )));
            }
            if self.attr_offset(column) != layout.column_offset(column) {
                return Err(Error::msg(format!(
                    "Attribute {} of block {} starts at {}, but its layout expects {}",
                    column,
                    block_id,
                    self.attr_offset(column),
                    layout.column_offset(column)
                )));
            }
        }
        Ok(())
    }
}

fn num_attrs_pos(num_attrs: usize) -> usize {
    ATTR_OFFSETS_START + num_attrs * 4
}
