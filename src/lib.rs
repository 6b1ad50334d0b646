//! Physical storage of fixed-size attributes in column-major blocks.
//!
//! A [`BlockLayout`](storage::layout::BlockLayout) is computed once per schema shape, blocks
//! handed out by the [`BlockStore`](storage::block_store::BlockStore) are initialized with
//! [`initialize_raw_block`](storage::block::initialize_raw_block), and a single
//! [`TupleAccessStrategy`](storage::tuple_access::TupleAccessStrategy) per layout reads,
//! writes and allocates slots in all of them.

pub mod catalog;
pub mod common;
pub mod storage;
