//! Index structures built on the buffer pool.

pub mod hash;

pub use hash::{
    DefaultKeyHash, ExtendibleHashTable, HashTableConfig, IdentityKeyHash, KeyHash, PageValue,
};
