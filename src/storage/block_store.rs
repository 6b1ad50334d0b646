use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{Error, Result};

use super::block::RawBlock;
use crate::common::{BlockId, BLOCK_SIZE, INVALID_BLOCK_ID};

/// BlockStore hands out zeroed blocks of a fixed size, each with a fresh block id.
/// Released blocks are zeroed and kept for reuse, up to `reuse_limit` of them.
pub struct BlockStore {
    block_size: u32,
    reuse_limit: usize,
    next_block_id: AtomicU32,
    reusable: Mutex<Vec<RawBlock>>,
}

impl BlockStore {
    pub fn new(block_size: u32, reuse_limit: usize) -> Self {
        Self {
            block_size,
            reuse_limit,
            next_block_id: AtomicU32::new(INVALID_BLOCK_ID + 1),
            reusable: Mutex::new(Vec::with_capacity(reuse_limit)),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Returns a zeroed block together with the id it should be initialized with
    pub fn get(&self) -> Result<(BlockId, RawBlock)> {
        let block_id = self
            .next_block_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |val| {
                if val == BlockId::MAX {
                    None
                } else {
                    Some(val + 1)
                }
            })
            .map_err(|_| Error::msg("Could not allocate a new block. Block id space is exhausted"))?;

        let reused = self.reusable.lock().unwrap().pop();
        let block = match reused {
            Some(block) => {
                tracing::trace!("Reusing a released block as block {}", block_id);
                block
            }
            None => RawBlock::zeroed(self.block_size),
        };
        Ok((block_id, block))
    }

    /// Takes back a block that is no longer used by anyone
    pub fn release(&self, mut block: RawBlock) {
        debug_assert_eq!(block.size(), self.block_size);
        let mut reusable = self.reusable.lock().unwrap();
        if reusable.len() >= self.reuse_limit {
            tracing::debug!(
                "Dropping released block, {} blocks are already kept for reuse",
                reusable.len()
            );
            return;
        }
        block.zero();
        reusable.push(block);
    }

    /// Returns how many released blocks are waiting to be reused
    pub fn reusable_blocks(&self) -> usize {
        self.reusable.lock().unwrap().len()
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new(BLOCK_SIZE, 16)
    }
}
