//! Buffer pool errors.

use crate::storage::{DiskError, PageId};

/// Errors that can occur during buffer pool operations.
#[derive(Debug)]
pub enum BufferError {
    /// Every frame is pinned; nothing can be evicted.
    PoolExhausted,

    /// The requested page was never allocated on disk.
    PageNotFound(PageId),

    /// Underlying disk error.
    Disk(DiskError),
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::PoolExhausted => {
                write!(f, "buffer pool exhausted: all frames are pinned")
            }
            BufferError::PageNotFound(page_id) => {
                write!(f, "page not found: {:?}", page_id)
            }
            BufferError::Disk(e) => {
                write!(f, "disk error: {}", e)
            }
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Disk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DiskError> for BufferError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::PageNotFound(id) => BufferError::PageNotFound(id),
            other => BufferError::Disk(other),
        }
    }
}
