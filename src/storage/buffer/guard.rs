//! RAII guards for buffer pool page access.
//!
//! Every guard owns one pin on its frame and releases it exactly once,
//! on drop. Latched guards additionally own the frame's data latch and
//! release it before unpinning. Guards are move-only values; upgrading
//! consumes the basic guard without double-releasing the pin.

use std::ops::{Deref, DerefMut};

use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::storage::disk::DiskManager;
use crate::storage::page::{PageData, PageId};

use super::frame::FrameId;
use super::pool::BufferPool;

/// An unlatched pin on a page.
///
/// Holds the page in its frame without granting data access; upgrade to
/// a [`PageReadGuard`] or [`PageWriteGuard`] to touch the bytes. On
/// drop, unpins with the guard's dirty flag.
pub struct PageGuard<'a, D: DiskManager> {
    pool: &'a BufferPool<D>,
    frame_id: FrameId,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a, D: DiskManager> PageGuard<'a, D> {
    pub(super) fn new(pool: &'a BufferPool<D>, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            is_dirty: false,
        }
    }

    /// Returns the PageId of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Marks the page dirty when this guard is dropped.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Acquires the shared latch, converting this pin into a read guard.
    pub async fn upgrade_read(self) -> PageReadGuard<'a, D> {
        let (pool, frame_id, page_id) = (self.pool, self.frame_id, self.page_id);
        // The pin transfers to the new guard; this one must not unpin.
        std::mem::forget(self);
        let data = pool.frames[frame_id].data.read().await;
        PageReadGuard::new(pool, frame_id, page_id, data)
    }

    /// Acquires the exclusive latch, converting this pin into a write
    /// guard and marking the frame dirty.
    pub async fn upgrade_write(self) -> PageWriteGuard<'a, D> {
        let (pool, frame_id, page_id) = (self.pool, self.frame_id, self.page_id);
        std::mem::forget(self);
        let data = pool.frames[frame_id].data.write().await;
        pool.mark_frame_dirty(frame_id);
        PageWriteGuard::new(pool, frame_id, page_id, data)
    }
}

impl<D: DiskManager> Drop for PageGuard<'_, D> {
    fn drop(&mut self) {
        self.pool.unpin_frame(self.frame_id, self.is_dirty);
    }
}

/// A pin plus a shared latch on a page.
///
/// Dereferences to the page bytes. On drop, the latch is released
/// first, then the pin (clean).
pub struct PageReadGuard<'a, D: DiskManager> {
    pool: &'a BufferPool<D>,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` only transiently during drop.
    data: Option<RwLockReadGuard<'a, PageData>>,
}

impl<'a, D: DiskManager> PageReadGuard<'a, D> {
    pub(super) fn new(
        pool: &'a BufferPool<D>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockReadGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            data: Some(data),
        }
    }

    /// Returns the PageId of the latched page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<D: DiskManager> Deref for PageReadGuard<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_ref().expect("guard already released").as_slice()
    }
}

impl<D: DiskManager> Drop for PageReadGuard<'_, D> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.data.take();
        self.pool.unpin_frame(self.frame_id, false);
    }
}

/// A pin plus the exclusive latch on a page.
///
/// Dereferences mutably to the page bytes; the frame was marked dirty
/// when the latch was acquired. On drop, the latch is released first,
/// then the pin (dirty).
pub struct PageWriteGuard<'a, D: DiskManager> {
    pool: &'a BufferPool<D>,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` only transiently during drop.
    data: Option<RwLockWriteGuard<'a, PageData>>,
}

impl<'a, D: DiskManager> PageWriteGuard<'a, D> {
    pub(super) fn new(
        pool: &'a BufferPool<D>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockWriteGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            data: Some(data),
        }
    }

    /// Returns the PageId of the latched page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<D: DiskManager> Deref for PageWriteGuard<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_ref().expect("guard already released").as_slice()
    }
}

impl<D: DiskManager> DerefMut for PageWriteGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
            .as_mut()
            .expect("guard already released")
            .as_mut_slice()
    }
}

impl<D: DiskManager> Drop for PageWriteGuard<'_, D> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.data.take();
        self.pool.unpin_frame(self.frame_id, true);
    }
}
