use std::sync::Arc;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::catalog::schema::Schema;
use crate::storage::layout::BlockLayout;
use crate::storage::tuple_access::TupleAccessStrategy;

pub mod schema;

/// Keeps a single [`TupleAccessStrategy`] per distinct layout, so the layout of a schema is computed
/// once and shared by every block and thread using it.
pub struct LayoutCache {
    block_size: u32,
    attr_sizes_to_strategy: DashMap<Vec<u8>, Arc<TupleAccessStrategy>>,
}

impl LayoutCache {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            attr_sizes_to_strategy: DashMap::new(),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn strategy_for(&self, schema: &Schema) -> Result<Arc<TupleAccessStrategy>> {
        self.strategy_for_sizes(&schema.attr_sizes())
    }

    /// Returns the strategy for blocks with the given attribute sizes, computing its layout on first use
    pub fn strategy_for_sizes(&self, attr_sizes: &[u8]) -> Result<Arc<TupleAccessStrategy>> {
        if let Some(strategy) = self.attr_sizes_to_strategy.get(attr_sizes) {
            return Ok(Arc::clone(strategy.value()));
        }

        let strategy = match self.attr_sizes_to_strategy.entry(attr_sizes.to_vec()) {
            // someone else computed it in the meantime
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let layout = BlockLayout::with_block_size(self.block_size, attr_sizes.to_vec())?;
                tracing::debug!(
                    "Computed layout for attribute sizes {:?}: {} slots per block",
                    attr_sizes,
                    layout.num_slots()
                );
                let strategy = Arc::new(TupleAccessStrategy::new(layout));
                vacant.insert(Arc::clone(&strategy));
                strategy
            }
        };
        Ok(strategy)
    }

    pub fn len(&self) -> usize {
        self.attr_sizes_to_strategy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attr_sizes_to_strategy.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use anyhow::Result;
    use lazy_static::lazy_static;

    use super::LayoutCache;
    use crate::catalog::schema::{ColumnDefinition, Schema, TypeId};
    use crate::storage::block::initialize_raw_block;
    use crate::storage::block_store::BlockStore;

    lazy_static! {
        static ref ACCOUNTS_SCHEMA: Schema = Schema::new(vec![
            ColumnDefinition::new(TypeId::BigInt, "id".to_owned(), true),
            ColumnDefinition::new(TypeId::Integer, "balance".to_owned(), false),
        ])
        .unwrap();
        static ref ORDERS_SCHEMA: Schema = Schema::new(vec![
            ColumnDefinition::new(TypeId::Timestamp, "placed_at".to_owned(), true),
            ColumnDefinition::new(TypeId::SmallInt, "quantity".to_owned(), false),
        ])
        .unwrap();
    }

    #[test]
    fn same_layout_shares_strategy() -> Result<()> {
        let cache = LayoutCache::new(4096);
        let first = cache.strategy_for(&ACCOUNTS_SCHEMA)?;
        let second = cache.strategy_for_sizes(&[8, 4])?;
        assert!(Arc::ptr_eq(&first, &second));

        let orders = cache.strategy_for(&ORDERS_SCHEMA)?;
        assert!(!Arc::ptr_eq(&first, &orders));
        assert_eq!(cache.len(), 2);
        Ok(())
    }

    #[test]
    fn invalid_layouts_are_not_cached() {
        let cache = LayoutCache::new(64);
        assert!(cache.strategy_for_sizes(&[200]).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn threads_share_blocks_through_cache() -> Result<()> {
        let cache = LayoutCache::new(8192);
        let store = BlockStore::new(8192, 2);
        let strategy = cache.strategy_for(&ACCOUNTS_SCHEMA)?;
        let (id, mut block) = store.get()?;
        initialize_raw_block(&mut block, strategy.layout(), id);

        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = (0..4u64)
                .map(|thread_no| {
                    let cache = &cache;
                    let block = &block;
                    scope.spawn(move || -> Result<()> {
                        let strategy = cache.strategy_for(&ACCOUNTS_SCHEMA)?;
                        let view = strategy.view(block)?;
                        while let Some(slot) = view.allocate() {
                            let id = (thread_no << 32) | slot as u64;
                            view.access_force_not_null(0, slot).write(&id.to_be_bytes());
                        }
                        Ok(())
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap()?;
            }
            Ok(())
        })?;

        let num_slots = strategy.layout().num_slots();
        assert_eq!(strategy.occupied(&block), num_slots);
        for slot in 0..num_slots {
            let attr = strategy.access_with_null_check(&block, 0, slot).unwrap();
            let mut id = [0u8; 8];
            attr.read_into(&mut id);
            assert_eq!(u64::from_be_bytes(id) as u32, slot);
            assert!(strategy.access_with_null_check(&block, 1, slot).is_none());
        }
        store.release(block);
        Ok(())
    }
}
