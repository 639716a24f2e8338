//! Frame storage for the buffer pool.
//!
//! A frame is a slot in the buffer pool that can hold one page at a
//! time. The page bytes live behind a per-frame read/write latch; the
//! bookkeeping (which page, pin count, dirty bit) lives in `FrameMeta`,
//! which is only ever touched under the pool's state mutex.

use tokio::sync::RwLock;

use crate::storage::{PageData, PageId};

/// Index of a frame in the buffer pool, in `[0, pool_size)`.
///
/// `FrameId` is distinct from `PageId`: a `PageId` names a logical page
/// on disk, a `FrameId` names a physical memory slot. Frame ids are only
/// meaningful within one `BufferPool` instance.
pub type FrameId = usize;

/// A buffer pool frame.
///
/// The data latch doubles as the page latch handed to guards: readers
/// share it, writers hold it exclusively, and the pool itself takes the
/// shared side while copying bytes out for a write-back.
pub struct Frame {
    pub(super) data: RwLock<PageData>,
}

impl Frame {
    pub(super) fn new() -> Self {
        Self {
            data: RwLock::new(PageData::new()),
        }
    }
}

/// Frame bookkeeping, protected by the pool's state mutex.
///
/// # Lifecycle
///
/// 1. **Empty**: `page_id = None`, the frame sits in the free list
/// 2. **Loaded**: a page was read in (or freshly allocated), pinned
/// 3. **Unpinned**: `pin_count = 0`, the frame is evictable
/// 4. **Evicted**: written back if dirty, then cleared and reused
pub(super) struct FrameMeta {
    /// The page currently hosted by this frame, if any.
    pub page_id: Option<PageId>,

    /// Number of outstanding users. A frame with `pin_count > 0` is
    /// never evicted.
    pub pin_count: u32,

    /// Whether the frame's bytes differ from disk. Set when a write
    /// guard is taken, cleared only after a successful write-back.
    pub is_dirty: bool,
}

impl FrameMeta {
    pub fn new() -> Self {
        Self {
            page_id: None,
            pin_count: 0,
            is_dirty: false,
        }
    }

    /// Returns the frame to the empty state.
    pub fn clear(&mut self) {
        self.page_id = None;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}
