use std::sync::atomic::AtomicU8;

use anyhow::{Error, Result};

use super::bitmap::ConcurrentBitmap;
use super::block::{BlockHeader, RawBlock};
use super::common::{load_bytes, store_bytes};
use super::layout::BlockLayout;
use crate::common::{ColumnId, SlotOffset, PRIMARY_KEY_COLUMN};

/// The bytes of a single attribute of a single slot inside a block
#[derive(Clone, Copy)]
pub struct AttrRef<'a> {
    bytes: &'a [AtomicU8],
}

impl<'a> AttrRef<'a> {
    /// Address of the first byte of the attribute
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr() as *const u8
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_into(&self, dest: &mut [u8]) {
        debug_assert_eq!(dest.len(), self.len());
        load_bytes(self.bytes, dest);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut value = vec![0u8; self.len()];
        self.read_into(&mut value);
        value
    }

    /// Overwrites the attribute. `value` has to be exactly as wide as the attribute.
    pub fn write(&self, value: &[u8]) {
        debug_assert_eq!(value.len(), self.len());
        store_bytes(self.bytes, value);
    }
}

/// Code for accessing data within blocks of one layout. It is stateless apart from the layout,
/// so a single instance can be shared by all threads working on blocks of that layout.
///
/// Columns and slots are taken as they are. Passing a column or slot outside of the layout is a bug
/// in the caller and panics at best.
pub struct TupleAccessStrategy {
    layout: BlockLayout,
}

impl TupleAccessStrategy {
    pub fn new(layout: BlockLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Binds this strategy to a single block, checking once that the block matches the layout
    pub fn view<'a>(&'a self, block: &'a RawBlock) -> Result<BlockView<'a>> {
        if block.size() < self.layout.content_end() {
            return Err(Error::msg(format!(
                "Block of {} bytes is too small for a layout ending at byte {}",
                block.size(),
                self.layout.content_end()
            )));
        }
        BlockHeader::new(block).check_layout(&self.layout)?;
        Ok(BlockView {
            strategy: self,
            block,
        })
    }

    /// Returns the null bitmap of `column`
    pub fn column_null_bitmap<'a>(
        &self,
        block: &'a RawBlock,
        column: ColumnId,
    ) -> ConcurrentBitmap<'a> {
        let bitmap = block.range(self.layout.column_offset(column), self.layout.bitmap_size());
        ConcurrentBitmap::new(bitmap)
    }

    /// Returns the values of `column`, one attribute after another
    pub fn column_start<'a>(&self, block: &'a RawBlock, column: ColumnId) -> &'a [AtomicU8] {
        let start = self.layout.column_offset(column) + self.layout.bitmap_size();
        let len = self.layout.num_slots() * self.layout.attr_size(column) as u32;
        block.range(start, len)
    }

    fn attr<'a>(&self, block: &'a RawBlock, column: ColumnId, slot: SlotOffset) -> AttrRef<'a> {
        debug_assert!(slot < self.layout.num_slots(), "Slot {slot} is out of range");
        let size = self.layout.attr_size(column) as u32;
        let start = self.layout.column_offset(column) + self.layout.bitmap_size() + slot * size;
        AttrRef {
            bytes: block.range(start, size),
        }
    }

    /// Returns the attribute, or None if it is null
    pub fn access_with_null_check<'a>(
        &self,
        block: &'a RawBlock,
        column: ColumnId,
        slot: SlotOffset,
    ) -> Option<AttrRef<'a>> {
        if !self.column_null_bitmap(block, column).test(slot) {
            return None;
        }
        Some(self.attr(block, column, slot))
    }

    /// Returns the attribute, marking it as not null first if necessary.
    /// Used to insert and update attributes.
    pub fn access_force_not_null<'a>(
        &self,
        block: &'a RawBlock,
        column: ColumnId,
        slot: SlotOffset,
    ) -> AttrRef<'a> {
        // noop if already not null
        self.column_null_bitmap(block, column).flip(slot, true);
        self.attr(block, column, slot)
    }

    /// Marks an attribute as null. On the primary key column, this frees the slot.
    pub fn set_null(&self, block: &RawBlock, column: ColumnId, slot: SlotOffset) {
        // noop if already null
        self.column_null_bitmap(block, column).flip(slot, false);
    }

    /// Claims the first free slot of the block.
    /// Returns None if every slot is taken. Concurrent callers never receive the same slot.
    pub fn allocate(&self, block: &RawBlock) -> Option<SlotOffset> {
        let presence = self.column_null_bitmap(block, PRIMARY_KEY_COLUMN);
        let slot = (0..self.layout.num_slots()).find(|&slot| presence.flip(slot, true));
        if slot.is_none() {
            tracing::trace!(
                "Block {} has no free slots left",
                BlockHeader::new(block).block_id()
            );
        }
        slot
    }

    /// Returns how many slots are currently taken
    pub fn occupied(&self, block: &RawBlock) -> u32 {
        self.column_null_bitmap(block, PRIMARY_KEY_COLUMN)
            .count_ones(self.layout.num_slots())
    }
}

/// A [`TupleAccessStrategy`] bound to one block whose header was checked against the layout
#[derive(Clone, Copy)]
pub struct BlockView<'a> {
    strategy: &'a TupleAccessStrategy,
    block: &'a RawBlock,
}

impl<'a> BlockView<'a> {
    pub fn header(&self) -> BlockHeader<'a> {
        BlockHeader::new(self.block)
    }

    pub fn column_null_bitmap(&self, column: ColumnId) -> ConcurrentBitmap<'a> {
        self.strategy.column_null_bitmap(self.block, column)
    }

    pub fn column_start(&self, column: ColumnId) -> &'a [AtomicU8] {
        self.strategy.column_start(self.block, column)
    }

    pub fn access_with_null_check(&self, column: ColumnId, slot: SlotOffset) -> Option<AttrRef<'a>> {
        self.strategy.access_with_null_check(self.block, column, slot)
    }

    pub fn access_force_not_null(&self, column: ColumnId, slot: SlotOffset) -> AttrRef<'a> {
        self.strategy.access_force_not_null(self.block, column, slot)
    }

    pub fn set_null(&self, column: ColumnId, slot: SlotOffset) {
        self.strategy.set_null(self.block, column, slot)
    }

    pub fn allocate(&self) -> Option<SlotOffset> {
        self.strategy.allocate(self.block)
    }

    pub fn occupied(&self) -> u32 {
        self.strategy.occupied(self.block)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    use anyhow::Result;
    use rand::Rng;

    use super::TupleAccessStrategy;
    use crate::storage::block::{initialize_raw_block, RawBlock};
    use crate::storage::layout::BlockLayout;

    fn new_block(strategy: &TupleAccessStrategy, id: u32) -> RawBlock {
        let mut raw = RawBlock::zeroed(strategy.layout().block_size());
        initialize_raw_block(&mut raw, strategy.layout(), id);
        raw
    }

    fn small_strategy() -> Result<TupleAccessStrategy> {
        Ok(TupleAccessStrategy::new(BlockLayout::with_block_size(
            2048,
            vec![4, 8, 1, 2],
        )?))
    }

    #[test]
    fn fresh_block_is_all_null() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);

        for column in 0..strategy.layout().num_attrs() {
            for slot in 0..strategy.layout().num_slots() {
                assert!(strategy.access_with_null_check(&block, column, slot).is_none());
            }
        }
        assert_eq!(strategy.occupied(&block), 0);
        Ok(())
    }

    #[test]
    fn force_not_null_returns_attribute_address() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);

        for (column, slot) in [(0, 0), (1, 5), (2, 17), (3, strategy.layout().num_slots() - 1)] {
            let written = strategy.access_force_not_null(&block, column, slot);
            let read = strategy
                .access_with_null_check(&block, column, slot)
                .expect("Attribute should not be null after forcing it");

            let size = strategy.layout().attr_size(column) as usize;
            let expected =
                strategy.column_start(&block, column).as_ptr() as usize + slot as usize * size;
            assert_eq!(read.as_ptr() as usize, expected);
            assert_eq!(written.as_ptr() as usize, expected);
            assert_eq!(read.len(), size);
        }
        Ok(())
    }

    #[test]
    fn force_not_null_is_idempotent() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);

        strategy.access_force_not_null(&block, 1, 3).write(&42u64.to_be_bytes());
        let attr = strategy.access_force_not_null(&block, 1, 3);
        assert_eq!(attr.to_vec(), 42u64.to_be_bytes().to_vec());
        assert!(strategy.column_null_bitmap(&block, 1).test(3));
        Ok(())
    }

    #[test]
    fn set_null_hides_attribute() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);

        strategy.access_force_not_null(&block, 2, 9).write(&[7]);
        strategy.set_null(&block, 2, 9);
        assert!(strategy.access_with_null_check(&block, 2, 9).is_none());
        // setting null twice is fine
        strategy.set_null(&block, 2, 9);
        assert!(strategy.access_with_null_check(&block, 2, 9).is_none());
        Ok(())
    }

    #[test]
    fn values_do_not_overlap() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);
        let layout = strategy.layout();

        for column in 0..layout.num_attrs() {
            for slot in 0..layout.num_slots() {
                let size = layout.attr_size(column) as usize;
                let value = vec![(column as u8) ^ (slot as u8); size];
                strategy.access_force_not_null(&block, column, slot).write(&value);
            }
        }
        for column in 0..layout.num_attrs() {
            for slot in 0..layout.num_slots() {
                let size = layout.attr_size(column) as usize;
                let attr = strategy.access_with_null_check(&block, column, slot).unwrap();
                assert_eq!(attr.to_vec(), vec![(column as u8) ^ (slot as u8); size]);
            }
        }
        Ok(())
    }

    #[test]
    fn allocate_until_full() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);
        let num_slots = strategy.layout().num_slots();

        for expected in 0..num_slots {
            assert_eq!(strategy.allocate(&block), Some(expected));
        }
        assert_eq!(strategy.allocate(&block), None);
        assert_eq!(strategy.occupied(&block), num_slots);

        // freeing the primary key makes the slot available again
        strategy.set_null(&block, 0, 7);
        assert_eq!(strategy.allocate(&block), Some(7));
        assert_eq!(strategy.allocate(&block), None);
        Ok(())
    }

    fn allocate_concurrently(
        strategy: &TupleAccessStrategy,
        block: &RawBlock,
        threads: u32,
        attempts_per_thread: u32,
    ) -> Vec<u32> {
        let claimed = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    for _ in 0..attempts_per_thread {
                        if let Some(slot) = strategy.allocate(block) {
                            local.push(slot);
                        }
                    }
                    claimed.lock().unwrap().extend(local);
                });
            }
        });
        claimed.into_inner().unwrap()
    }

    #[test]
    fn concurrent_allocate_never_hands_out_slot_twice() -> Result<()> {
        let strategy = TupleAccessStrategy::new(BlockLayout::with_block_size(16384, vec![8, 4])?);
        let num_slots = strategy.layout().num_slots();
        let threads = 8;

        // fewer attempts than slots: every attempt succeeds,
        // more attempts than slots: the block ends up full
        for attempts_per_thread in [num_slots / 16, num_slots / 4] {
            let block = new_block(&strategy, 1);
            let claimed = allocate_concurrently(&strategy, &block, threads, attempts_per_thread);

            let attempts = threads * attempts_per_thread;
            let expected = attempts.min(num_slots);
            let distinct: HashSet<_> = claimed.iter().copied().collect();
            assert_eq!(claimed.len() as u32, expected);
            assert_eq!(distinct.len(), claimed.len(), "A slot was handed out twice");
            assert_eq!(strategy.occupied(&block), expected);
        }
        Ok(())
    }

    #[test]
    fn random_insert_delete_workload() -> Result<()> {
        let strategy = small_strategy()?;
        let block = new_block(&strategy, 1);
        let mut rng = rand::thread_rng();
        let mut live = HashSet::new();

        for _ in 0..2000 {
            if rng.gen_bool(0.6) {
                match strategy.allocate(&block) {
                    Some(slot) => {
                        assert!(live.insert(slot), "Slot {slot} was already live");
                        strategy
                            .access_force_not_null(&block, 0, slot)
                            .write(&slot.to_be_bytes());
                    }
                    None => assert_eq!(live.len() as u32, strategy.layout().num_slots()),
                }
            } else {
                let victim = live.iter().next().copied();
                if let Some(slot) = victim {
                    live.remove(&slot);
                    strategy.set_null(&block, 0, slot);
                }
            }
        }

        assert_eq!(strategy.occupied(&block), live.len() as u32);
        for &slot in &live {
            let attr = strategy.access_with_null_check(&block, 0, slot).unwrap();
            assert_eq!(attr.to_vec(), slot.to_be_bytes().to_vec());
        }
        Ok(())
    }

    #[test]
    fn view_rejects_foreign_block() -> Result<()> {
        let strategy = small_strategy()?;
        let other = TupleAccessStrategy::new(BlockLayout::with_block_size(2048, vec![4, 4])?);
        let block = new_block(&other, 1);

        assert!(strategy.view(&block).is_err());
        assert!(other.view(&block).is_ok());
        Ok(())
    }

    #[test]
    fn two_column_scenario() -> Result<()> {
        let strategy = TupleAccessStrategy::new(BlockLayout::with_block_size(1264, vec![8, 4])?);
        assert_eq!(strategy.layout().num_slots(), 100);
        let block = new_block(&strategy, 7);
        let view = strategy.view(&block)?;
        assert_eq!(view.header().block_id(), 7);

        let slot = view.allocate();
        assert_eq!(slot, Some(0));
        view.access_force_not_null(0, 0).write(&1234u64.to_be_bytes());

        let pk = view.access_with_null_check(0, 0);
        assert!(pk.is_some());
        assert_eq!(pk.unwrap().to_vec(), 1234u64.to_be_bytes().to_vec());
        assert!(view.access_with_null_check(1, 0).is_none());
        assert_eq!(view.occupied(), 1);
        Ok(())
    }
}
