//! Buffer pool manager.
//!
//! The buffer pool caches pages in a bounded set of in-memory frames,
//! mapping page ids to frames on demand. When every frame is occupied,
//! the LRU-K replacer picks a victim; dirty victims are written back
//! through the disk scheduler before their frame is reused.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::storage::disk::{DiskManager, DiskScheduler};
use crate::storage::error::DiskError;
use crate::storage::page::{PageData, PageId};

use super::error::BufferError;
use super::frame::{Frame, FrameId, FrameMeta};
use super::guard::{PageGuard, PageReadGuard, PageWriteGuard};
use super::replacer::{AccessType, LruKReplacer};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,

    /// History depth of the LRU-K replacer.
    pub replacer_k: usize,

    /// Worker threads of the disk scheduler. One worker serializes all
    /// I/O in strict FIFO order; more workers trade per-page request
    /// ordering (which the pool re-establishes itself) for throughput.
    pub io_workers: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024, // 1024 * 4KB = 4MB
            replacer_k: 2,
            io_workers: 1,
        }
    }
}

/// The buffer pool manager.
///
/// # Concurrency Model
///
/// One synchronous state mutex guards the page table, the free list,
/// the replacer, and all frame metadata. Page *bytes* live behind
/// per-frame async read/write latches that double as the page latches
/// handed out to guards.
///
/// The state mutex is never held across an `.await`: operations take
/// it, update bookkeeping, release it, and only then wait on latches or
/// scheduler completions. Because of that, blocking disk I/O never
/// stalls unrelated pool traffic.
///
/// Two rules keep frames with in-flight I/O invisible:
///
/// - a frame being *loaded* is published in the page table only after
///   its read completes (two racing loaders of one page resolve by
///   re-checking the table afterwards and discarding the loser's frame),
/// - a frame being *written back* keeps its shared data latch for the
///   duration of the write, so mutators wait, and its page table entry
///   is removed only after the write completes, so a later miss-read of
///   the same page id is ordered behind the write.
///
/// # Thread Safety
///
/// Safe to share across tasks via `Arc<BufferPool<D>>`.
pub struct BufferPool<D: DiskManager> {
    disk: Arc<D>,
    scheduler: DiskScheduler,
    pub(super) frames: Vec<Frame>,
    state: Mutex<PoolState>,
    config: BufferPoolConfig,
}

/// Mutable state protected by the state mutex.
struct PoolState {
    /// Maps PageId -> FrameId; bijective on resident pages.
    page_table: HashMap<PageId, FrameId>,

    /// Bookkeeping for each frame (indexed by FrameId).
    meta: Vec<FrameMeta>,

    /// Frames not currently holding any page.
    free_list: Vec<FrameId>,

    /// Eviction policy. Invoked only under this mutex, which serializes
    /// its timestamp counter.
    replacer: LruKReplacer,
}

impl<D: DiskManager> BufferPool<D> {
    /// Creates a new buffer pool on top of a disk manager.
    ///
    /// # Panics
    ///
    /// Panics if `config.pool_size` is 0.
    pub fn new(disk: Arc<D>, config: BufferPoolConfig) -> Self {
        assert!(config.pool_size > 0, "pool_size must be > 0");

        let frames: Vec<_> = (0..config.pool_size).map(|_| Frame::new()).collect();
        let meta: Vec<_> = (0..config.pool_size).map(|_| FrameMeta::new()).collect();
        let free_list: Vec<_> = (0..config.pool_size).rev().collect();

        let state = PoolState {
            page_table: HashMap::with_capacity(config.pool_size),
            meta,
            free_list,
            replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
        };

        Self {
            scheduler: DiskScheduler::with_workers(Arc::clone(&disk), config.io_workers),
            disk,
            frames,
            state: Mutex::new(state),
            config,
        }
    }

    /// Returns the number of frames in the buffer pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the number of pages currently resident.
    pub fn resident_page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Allocates a fresh page and pins it into a frame.
    ///
    /// The new page is zeroed and pinned with count 1; the returned
    /// basic guard can be upgraded to a latched guard.
    ///
    /// # Errors
    ///
    /// `BufferError::PoolExhausted` iff every frame is pinned.
    pub async fn new_page(&self, access: AccessType) -> Result<PageGuard<'_, D>, BufferError> {
        let frame_id = self.claim_frame().await?;

        let page_id = match self.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.release_frame(frame_id);
                return Err(e.into());
            }
        };

        self.frames[frame_id].data.write().await.zero();

        {
            let mut state = self.state.lock();
            state.page_table.insert(page_id, frame_id);
            let meta = &mut state.meta[frame_id];
            meta.page_id = Some(page_id);
            meta.pin_count = 1;
            meta.is_dirty = false;
            state.replacer.record_access(frame_id, access);
            state.replacer.set_evictable(frame_id, false);
        }

        trace!(page = page_id.page_num(), frame = frame_id, "new page");
        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetches a page and returns an unlatched pin on it.
    ///
    /// # Errors
    ///
    /// - `BufferError::PoolExhausted` if the pool is full of pinned frames
    /// - `BufferError::PageNotFound` if the page was never allocated
    pub async fn fetch_page_basic(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<PageGuard<'_, D>, BufferError> {
        let frame_id = self.pin_page(page_id, access).await?;
        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetches a page and returns a shared-latched read guard.
    ///
    /// # Errors
    ///
    /// Same as [`BufferPool::fetch_page_basic`].
    pub async fn fetch_page_read(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<PageReadGuard<'_, D>, BufferError> {
        let frame_id = self.pin_page(page_id, access).await?;
        let data = self.frames[frame_id].data.read().await;
        Ok(PageReadGuard::new(self, frame_id, page_id, data))
    }

    /// Fetches a page and returns an exclusive-latched write guard.
    ///
    /// The frame is marked dirty as soon as the latch is acquired.
    ///
    /// # Errors
    ///
    /// Same as [`BufferPool::fetch_page_basic`].
    pub async fn fetch_page_write(
        &self,
        page_id: PageId,
        access: AccessType,
    ) -> Result<PageWriteGuard<'_, D>, BufferError> {
        let frame_id = self.pin_page(page_id, access).await?;
        let data = self.frames[frame_id].data.write().await;
        self.mark_frame_dirty(frame_id);
        Ok(PageWriteGuard::new(self, frame_id, page_id, data))
    }

    /// Decrements a page's pin count, ORing in `is_dirty`.
    ///
    /// Returns `false` if the page is not resident or already unpinned.
    /// Guards call this automatically on drop; it is public for callers
    /// managing pins by hand.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.meta[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a resident page to disk, dirty or not, and clears its
    /// dirty bit. Returns `false` if the page is not resident.
    ///
    /// # Panics
    ///
    /// Panics if the write fails; the pool has no recovery path.
    pub async fn flush_page(&self, page_id: PageId) -> bool {
        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return false,
            }
        };

        // The shared latch keeps mutators out for the duration of the
        // write, so clearing the dirty bit afterwards cannot lose an
        // update.
        let data = self.frames[frame_id].data.read().await;
        {
            let state = self.state.lock();
            if state.meta[frame_id].page_id != Some(page_id) {
                // Evicted while we waited for the latch.
                return false;
            }
        }

        self.write_back(page_id, data.as_slice()).await;

        let mut state = self.state.lock();
        if state.meta[frame_id].page_id == Some(page_id) {
            state.meta[frame_id].is_dirty = false;
        }
        true
    }

    /// Flushes every resident page.
    pub async fn flush_all_pages(&self) {
        let pages: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };

        debug!(pages = pages.len(), "flushing all resident pages");
        for page_id in pages {
            self.flush_page(page_id).await;
        }
    }

    /// Drops a page from the pool and deallocates its id.
    ///
    /// Returns `true` if the page is absent (idempotent) or was
    /// successfully deleted, `false` if it is pinned. Dirty contents are
    /// written back before the frame is reused.
    pub async fn delete_page(&self, page_id: PageId) -> bool {
        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                None => return true,
                Some(&frame_id) => {
                    if state.meta[frame_id].pin_count > 0 {
                        return false;
                    }
                    frame_id
                }
            }
        };

        let data = self.frames[frame_id].data.read().await;
        let dirty = {
            let state = self.state.lock();
            if state.meta[frame_id].page_id != Some(page_id) {
                // Evicted while we waited for the latch; nothing resident
                // to delete.
                return true;
            }
            if state.meta[frame_id].pin_count > 0 {
                return false;
            }
            state.meta[frame_id].is_dirty
        };

        if dirty {
            self.write_back(page_id, data.as_slice()).await;
        }

        {
            let mut state = self.state.lock();
            if state.meta[frame_id].page_id != Some(page_id) {
                return true;
            }
            if state.meta[frame_id].pin_count > 0 {
                return false;
            }
            state.replacer.remove(frame_id);
            state.page_table.remove(&page_id);
            state.meta[frame_id].clear();
            state.free_list.push(frame_id);
        }
        drop(data);

        if let Err(e) = self.disk.deallocate_page(page_id) {
            debug!(page = page_id.page_num(), error = %e, "deallocate_page failed");
        }
        trace!(page = page_id.page_num(), frame = frame_id, "deleted page");
        true
    }

    /// Pins the frame holding `page_id`, loading it from disk on a miss.
    async fn pin_page(&self, page_id: PageId, access: AccessType) -> Result<FrameId, BufferError> {
        // Fast path: the page is resident.
        {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                state.meta[frame_id].pin_count += 1;
                state.replacer.record_access(frame_id, access);
                state.replacer.set_evictable(frame_id, false);
                return Ok(frame_id);
            }
        }

        // Miss: claim a frame and read the page into it. The frame is
        // not yet published, so nobody else can observe the read in
        // flight.
        let frame_id = self.claim_frame().await?;

        let completion = self.scheduler.schedule_read(page_id);
        let buf = match completion
            .await
            .expect("disk scheduler dropped a read completion")
        {
            Ok(buf) => buf,
            Err(DiskError::PageNotFound(_)) => {
                self.release_frame(frame_id);
                return Err(BufferError::PageNotFound(page_id));
            }
            Err(e) => {
                error!(page = page_id.page_num(), error = %e, "page read failed");
                panic!("read of page {} failed: {}", page_id.page_num(), e);
            }
        };

        self.frames[frame_id]
            .data
            .write()
            .await
            .as_mut_slice()
            .copy_from_slice(buf.as_slice());

        let mut state = self.state.lock();
        if let Some(&winner) = state.page_table.get(&page_id) {
            // Another task loaded this page while our read was in
            // flight; use its frame and return ours.
            state.free_list.push(frame_id);
            state.meta[winner].pin_count += 1;
            state.replacer.record_access(winner, access);
            state.replacer.set_evictable(winner, false);
            return Ok(winner);
        }
        state.page_table.insert(page_id, frame_id);
        let meta = &mut state.meta[frame_id];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.replacer.record_access(frame_id, access);
        state.replacer.set_evictable(frame_id, false);
        Ok(frame_id)
    }

    /// Produces an empty, unpublished frame: from the free list if
    /// possible, else by evicting a victim (writing it back first when
    /// dirty).
    async fn claim_frame(&self) -> Result<FrameId, BufferError> {
        {
            let mut state = self.state.lock();
            if let Some(frame_id) = state.free_list.pop() {
                return Ok(frame_id);
            }
        }

        loop {
            let victim = {
                let mut state = self.state.lock();
                // The free list may have been refilled while unlocked.
                if let Some(frame_id) = state.free_list.pop() {
                    return Ok(frame_id);
                }
                state.replacer.evict()
            };
            let Some(frame_id) = victim else {
                return Err(BufferError::PoolExhausted);
            };

            // Hold the shared data latch across the write-back so no
            // mutator can change the bytes mid-flight.
            let data = self.frames[frame_id].data.read().await;

            let (page_id, dirty) = {
                let state = self.state.lock();
                let meta = &state.meta[frame_id];
                if meta.pin_count > 0 {
                    // Re-pinned while we acquired the latch; the pinning
                    // access re-registered the frame with the replacer.
                    continue;
                }
                (
                    meta.page_id.expect("victim frame must be mapped"),
                    meta.is_dirty,
                )
            };

            if dirty {
                debug!(
                    page = page_id.page_num(),
                    frame = frame_id,
                    "evicting dirty page"
                );
                self.write_back(page_id, data.as_slice()).await;
                let mut state = self.state.lock();
                state.meta[frame_id].is_dirty = false;
            }

            {
                let mut state = self.state.lock();
                if state.meta[frame_id].pin_count > 0 {
                    // Pinned while the write drained. The write-back was
                    // still sound: the latch kept the bytes stable.
                    continue;
                }
                if state.meta[frame_id].is_dirty {
                    // A pin/unpin cycle marked the frame dirty after the
                    // snapshot above (a basic guard can do so without the
                    // data latch). The pinning access put the frame back
                    // in the replacer; go around so the next pass writes
                    // it back instead of evicting on the stale snapshot.
                    continue;
                }
                // The frame may have cycled through pin/unpin while we
                // waited, re-registering itself with the replacer.
                state.replacer.remove(frame_id);
                state.page_table.remove(&page_id);
                state.meta[frame_id].clear();
                return Ok(frame_id);
            }
        }
    }

    /// Returns an unpublished frame to the free list.
    fn release_frame(&self, frame_id: FrameId) {
        self.state.lock().free_list.push(frame_id);
    }

    pub(super) fn mark_frame_dirty(&self, frame_id: FrameId) {
        self.state.lock().meta[frame_id].is_dirty = true;
    }

    /// Unpins a frame directly; guards call this on drop.
    pub(super) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.state.lock();
        let meta = &mut state.meta[frame_id];
        debug_assert!(meta.pin_count > 0, "unpin of unpinned frame {}", frame_id);
        if meta.pin_count == 0 {
            return;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }

    /// Submits a page write and waits for it.
    ///
    /// # Panics
    ///
    /// Panics if the write fails; the pool has no recovery path.
    async fn write_back(&self, page_id: PageId, data: &[u8]) {
        let completion = self
            .scheduler
            .schedule_write(page_id, PageData::copy_of(data));
        let result = completion
            .await
            .expect("disk scheduler dropped a write completion");
        if let Err(e) = result {
            error!(page = page_id.page_num(), error = %e, "page write failed");
            panic!("write of page {} failed: {}", page_id.page_num(), e);
        }
    }
}
