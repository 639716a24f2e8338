//! File-backed disk manager.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::DiskManager;
use crate::storage::error::DiskError;
use crate::storage::page::{PAGE_SIZE, PageId};

/// File-backed disk manager.
///
/// Stores pages as contiguous 4KB blocks in a single file.
///
/// # File Layout
///
/// ```text
/// +------------------+------------------+------------------+
/// | Page 0 (4KB)     | Page 1 (4KB)     | Page 2 (4KB)     | ...
/// +------------------+------------------+------------------+
/// ^ offset 0         ^ offset 4096      ^ offset 8192
/// ```
///
/// # Concurrency
///
/// A `Mutex` around the file handle serializes seeks and transfers. All
/// calls are blocking and run on the disk scheduler's worker threads.
///
/// # Durability
///
/// Writes land in the OS page cache; call `sync_all` to force them to
/// physical disk.
pub struct FileDisk {
    /// Path to the storage file
    path: PathBuf,
    /// File handle, locked for the duration of each transfer
    file: Mutex<File>,
    /// Number of pages currently allocated
    page_count: AtomicU32,
}

impl FileDisk {
    /// Opens or creates a storage file at the given path.
    ///
    /// If the file exists, its page count is derived from the file size.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::Corrupted` if the file size is not a multiple
    /// of PAGE_SIZE.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DiskError> {
        let path = path.into();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(DiskError::Corrupted(format!(
                "file size {} is not a multiple of page size {}",
                file_size, PAGE_SIZE
            )));
        }

        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            path,
            file: Mutex::new(file),
            page_count: AtomicU32::new(page_count),
        })
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs all pending writes to physical disk (fsync).
    pub fn sync_all(&self) -> Result<(), DiskError> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl DiskManager for FileDisk {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        if page_id.page_num() >= self.page_count.load(Ordering::Acquire) {
            return Err(DiskError::PageNotFound(page_id));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        if page_id.page_num() >= self.page_count.load(Ordering::Acquire) {
            return Err(DiskError::PageNotFound(page_id));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        file.write_all(buf)?;

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, DiskError> {
        // Extend the file by one zero page under the file lock so that
        // concurrent allocations cannot interleave their appends.
        let mut file = self.file.lock();
        let page_num = self.page_count.load(Ordering::Acquire);
        let page_id = PageId::new(page_num);

        file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        file.write_all(&[0u8; PAGE_SIZE])?;

        self.page_count.store(page_num + 1, Ordering::Release);
        Ok(page_id)
    }

    fn deallocate_page(&self, _page_id: PageId) -> Result<(), DiskError> {
        // Hook only; the file does not shrink and ids are not reused.
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.page_count(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_allocate_write_read() {
        let dir = tempdir().unwrap();
        let disk = FileDisk::open(dir.path().join("test.db")).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0] = 0xCA;
        buf[PAGE_SIZE - 1] = 0xFE;
        disk.write_page(page_id, &buf).unwrap();

        let mut read_buf = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_buf).unwrap();
        assert_eq!(read_buf, buf);
    }

    #[test]
    fn test_allocated_page_reads_zeroed() {
        let dir = tempdir().unwrap();
        let disk = FileDisk::open(dir.path().join("test.db")).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut buf = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reopen_preserves_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let page_id = {
            let disk = FileDisk::open(&path).unwrap();
            let page_id = disk.allocate_page().unwrap();
            let mut buf = vec![0u8; PAGE_SIZE];
            buf[7] = 77;
            disk.write_page(page_id, &buf).unwrap();
            disk.sync_all().unwrap();
            page_id
        };

        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.page_count(), 1);
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[7], 77);
    }

    #[test]
    fn test_read_unallocated_page() {
        let dir = tempdir().unwrap();
        let disk = FileDisk::open(dir.path().join("test.db")).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = disk.read_page(PageId::new(3), &mut buf);
        assert!(matches!(result, Err(DiskError::PageNotFound(_))));
    }

    #[test]
    fn test_corrupted_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 1]).unwrap();

        let result = FileDisk::open(&path);
        assert!(matches!(result, Err(DiskError::Corrupted(_))));
    }
}
