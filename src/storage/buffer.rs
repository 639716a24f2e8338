//! Buffer pool: bounded page cache with LRU-K replacement.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum::storage::{AccessType, BufferPool, BufferPoolConfig, MemoryDisk};
//!
//! # async fn example() {
//! let disk = Arc::new(MemoryDisk::new());
//! let pool = BufferPool::new(disk, BufferPoolConfig::default());
//!
//! // Allocate a page and write through an exclusive guard.
//! let guard = pool.new_page(AccessType::Unknown).await.unwrap();
//! let page_id = guard.page_id();
//! let mut guard = guard.upgrade_write().await;
//! guard[0..5].copy_from_slice(b"hello");
//! drop(guard); // releases the latch, then the pin
//!
//! // Read it back through a shared guard.
//! let guard = pool.fetch_page_read(page_id, AccessType::Unknown).await.unwrap();
//! assert_eq!(&guard[0..5], b"hello");
//! # }
//! ```

mod error;
mod frame;
mod guard;
mod pool;
mod replacer;

pub use error::BufferError;
pub use frame::FrameId;
pub use guard::{PageGuard, PageReadGuard, PageWriteGuard};
pub use pool::{BufferPool, BufferPoolConfig};
pub use replacer::{AccessType, LruKReplacer};
