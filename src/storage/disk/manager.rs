//! Disk manager trait definition.

use crate::storage::{DiskError, PageId};

/// Page-granular blocking I/O backend.
///
/// A disk manager reads and writes single pages identified by `PageId`
/// and hands out fresh page ids. Implementations include:
/// - `MemoryDisk`: in-memory pages for testing
/// - `FileDisk`: a single file with one 4KB slot per page
///
/// # Design Decisions
///
/// 1. **Blocking calls**: `read_page`/`write_page` may block. They are
///    only ever invoked from the disk scheduler's worker threads, never
///    from async tasks, so the async side of the crate stays responsive.
///
/// 2. **Caller-owned buffers**: the disk manager moves raw bytes only.
///    Buffer lifetime and caching are the buffer pool's responsibility.
///
/// 3. **Monotonic allocation**: `allocate_page` hands out monotonically
///    increasing ids. `deallocate_page` is a hook for a free-list; the
///    provided implementations accept it and do not reuse ids.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the scheduler may run several
/// worker threads against one disk manager.
pub trait DiskManager: Send + Sync + 'static {
    /// Reads one page into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page has not been allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError>;

    /// Writes one page from a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page has not been allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError>;

    /// Allocates a new zeroed page and returns its id.
    fn allocate_page(&self) -> Result<PageId, DiskError>;

    /// Releases a page id back to the disk manager.
    ///
    /// Reuse of deallocated ids is optional; both provided
    /// implementations treat this as a no-op hook.
    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError>;

    /// Returns the total number of allocated pages.
    fn page_count(&self) -> u32;
}
