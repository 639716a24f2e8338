//! In-memory disk manager.

use parking_lot::Mutex;

use super::DiskManager;
use crate::storage::error::DiskError;
use crate::storage::page::{PAGE_SIZE, PageData, PageId};

/// In-memory disk manager for testing and development.
///
/// Stores pages in a Vec backed by aligned page buffers. Page ids are
/// assigned sequentially as Vec indices. `deallocate_page` is a no-op;
/// ids are never reused.
pub struct MemoryDisk {
    pages: Mutex<Vec<PageData>>,
}

impl MemoryDisk {
    /// Creates a new empty in-memory disk.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDisk {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let pages = self.pages.lock();
        let page = pages
            .get(page_id.page_num() as usize)
            .ok_or(DiskError::PageNotFound(page_id))?;

        buf.copy_from_slice(page.as_slice());
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut pages = self.pages.lock();
        let page = pages
            .get_mut(page_id.page_num() as usize)
            .ok_or(DiskError::PageNotFound(page_id))?;

        page.as_mut_slice().copy_from_slice(buf);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, DiskError> {
        let mut pages = self.pages.lock();
        let page_id = PageId::new(pages.len() as u32);
        pages.push(PageData::new());
        Ok(page_id)
    }

    fn deallocate_page(&self, _page_id: PageId) -> Result<(), DiskError> {
        // Hook only; ids are not reused.
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.pages.lock().len() as u32
    }
}
