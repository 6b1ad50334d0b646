pub mod bitmap;
pub mod block;
pub mod block_store;
pub(in crate::storage) mod common;
pub mod layout;
pub mod tuple_access;
