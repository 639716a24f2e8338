//! Disk-backed extendible hash table.
//!
//! The table is a three-level structure: one header page routes the top
//! bits of a key's hash to a directory page, each directory routes the
//! low bits to a bucket page, and buckets hold the key/value pairs. All
//! persistence goes through buffer pool page guards.
//!
//! Latches are acquired strictly top-down (header, then directory, then
//! bucket) and released as soon as the next level is pinned, so lookups
//! on disjoint buckets proceed in parallel and writers cannot deadlock.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::storage::{AccessType, BufferError, BufferPool, DiskManager, PageId, PageWriteGuard};

use super::bucket::{BucketPage, bucket_capacity};
use super::directory::{DIRECTORY_MAX_DEPTH, DirectoryPage};
use super::header::{HEADER_MAX_DEPTH, HeaderPage};
use super::key::{DefaultKeyHash, KeyHash, PageValue};

/// Shape parameters of a hash table instance.
#[derive(Debug, Clone)]
pub struct HashTableConfig {
    /// Hash bits consumed by the header, at most [`HEADER_MAX_DEPTH`].
    pub header_max_depth: u32,

    /// Upper bound on each directory's global depth, at most
    /// [`DIRECTORY_MAX_DEPTH`].
    pub directory_max_depth: u32,

    /// Entries per bucket page; 0 means as many as fit in one page.
    pub bucket_max_size: u32,
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            header_max_depth: HEADER_MAX_DEPTH,
            directory_max_depth: DIRECTORY_MAX_DEPTH,
            bucket_max_size: 0,
        }
    }
}

/// A disk-resident extendible hash table.
///
/// Keys are unique under `Ord` equality; the hash function is
/// injectable so tests can route deterministically. Buckets split on
/// overflow (growing their directory as needed) and merge with their
/// split image when either side empties; the directory shrinks when no
/// bucket uses its full depth.
///
/// # Failure Semantics
///
/// - `insert` returns `Ok(false)` iff the key already exists, or the
///   target bucket is full while its directory is saturated. No state
///   changes in either case.
/// - `remove` returns `Ok(false)` iff the key is absent; no state change.
/// - `get` returns `Ok(None)` iff the key is absent.
///
/// Buffer pool errors (pool exhausted, unreadable pages) surface as
/// `Err`.
pub struct ExtendibleHashTable<K, V, D, H = DefaultKeyHash>
where
    D: DiskManager,
{
    name: String,
    pool: Arc<BufferPool<D>>,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, D, H> ExtendibleHashTable<K, V, D, H>
where
    K: PageValue + Ord,
    V: PageValue,
    D: DiskManager,
    H: KeyHash<K>,
{
    /// Creates a table, allocating and formatting its header page.
    ///
    /// # Panics
    ///
    /// Panics if the config exceeds the per-page depth limits or the
    /// bucket capacity of a page.
    pub async fn new(
        name: impl Into<String>,
        pool: Arc<BufferPool<D>>,
        hasher: H,
        config: HashTableConfig,
    ) -> Result<Self, BufferError> {
        let name = name.into();
        assert!(
            config.header_max_depth <= HEADER_MAX_DEPTH,
            "header_max_depth {} exceeds limit {}",
            config.header_max_depth,
            HEADER_MAX_DEPTH
        );
        assert!(
            config.directory_max_depth <= DIRECTORY_MAX_DEPTH,
            "directory_max_depth {} exceeds limit {}",
            config.directory_max_depth,
            DIRECTORY_MAX_DEPTH
        );

        let capacity = bucket_capacity::<K, V>() as u32;
        let bucket_max_size = match config.bucket_max_size {
            0 => capacity,
            n => {
                assert!(
                    n <= capacity,
                    "bucket_max_size {} exceeds page capacity {}",
                    n,
                    capacity
                );
                n
            }
        };

        let guard = pool.new_page(AccessType::Index).await?;
        let header_page_id = guard.page_id();
        let mut header = guard.upgrade_write().await;
        HeaderPage::new(&mut *header).init(config.header_max_depth);
        drop(header);

        debug!(table = %name, header = header_page_id.page_num(), "created hash table");
        Ok(Self {
            name,
            pool,
            hasher,
            header_page_id,
            directory_max_depth: config.directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    /// Returns the table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the page id of the header page.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up the value stored under `key`.
    pub async fn get(&self, key: &K) -> Result<Option<V>, BufferError> {
        let hash = self.hasher.hash_key(key);

        let header = self
            .pool
            .fetch_page_read(self.header_page_id, AccessType::Index)
            .await?;
        let directory_page_id = {
            let view = HeaderPage::new(&*header);
            view.directory_page_id(view.hash_to_directory_index(hash))
        };
        drop(header);
        if directory_page_id.is_invalid() {
            return Ok(None);
        }

        let directory = self
            .pool
            .fetch_page_read(directory_page_id, AccessType::Index)
            .await?;
        let bucket_page_id = {
            let view = DirectoryPage::new(&*directory);
            view.bucket_page_id(view.hash_to_bucket_index(hash))
        };
        drop(directory);
        if bucket_page_id.is_invalid() {
            return Ok(None);
        }

        let bucket = self
            .pool
            .fetch_page_read(bucket_page_id, AccessType::Index)
            .await?;
        Ok(BucketPage::<K, V, _>::new(&*bucket).lookup(key))
    }

    /// Inserts a key/value pair.
    ///
    /// Returns `Ok(false)` when the key already exists, or when the
    /// bucket is full and its directory can no longer grow.
    pub async fn insert(&self, key: &K, value: &V) -> Result<bool, BufferError> {
        let hash = self.hasher.hash_key(key);

        let mut header = self
            .pool
            .fetch_page_write(self.header_page_id, AccessType::Index)
            .await?;
        let directory_index = HeaderPage::new(&*header).hash_to_directory_index(hash);
        let directory_page_id = HeaderPage::new(&*header).directory_page_id(directory_index);

        if directory_page_id.is_invalid() {
            // First key routed to this header slot: build the directory
            // and its initial bucket.
            let guard = self.pool.new_page(AccessType::Index).await?;
            let directory_page_id = guard.page_id();
            let mut directory = guard.upgrade_write().await;
            DirectoryPage::new(&mut *directory).init(self.directory_max_depth);
            HeaderPage::new(&mut *header).set_directory_page_id(directory_index, directory_page_id);
            drop(header);
            debug!(
                table = %self.name,
                directory = directory_page_id.page_num(),
                slot = directory_index,
                "created directory"
            );

            let bucket_index = DirectoryPage::new(&*directory).hash_to_bucket_index(hash);
            return self
                .insert_into_new_bucket(&mut directory, bucket_index, key, value)
                .await;
        }
        drop(header);

        let mut directory = self
            .pool
            .fetch_page_write(directory_page_id, AccessType::Index)
            .await?;
        let mut bucket_index = DirectoryPage::new(&*directory).hash_to_bucket_index(hash);
        let mut bucket_page_id = DirectoryPage::new(&*directory).bucket_page_id(bucket_index);

        if bucket_page_id.is_invalid() {
            // An earlier insert linked this directory but its first
            // bucket allocation failed (the pool can be exhausted
            // between the two new_page calls); finish the setup now.
            return self
                .insert_into_new_bucket(&mut directory, bucket_index, key, value)
                .await;
        }

        let mut bucket = self
            .pool
            .fetch_page_write(bucket_page_id, AccessType::Index)
            .await?;

        if BucketPage::<K, V, _>::new(&*bucket).lookup(key).is_some() {
            return Ok(false);
        }

        while BucketPage::<K, V, _>::new(&*bucket).is_full() {
            let local_depth = DirectoryPage::new(&*directory).local_depth(bucket_index);
            let global_depth = DirectoryPage::new(&*directory).global_depth();
            if local_depth == global_depth {
                if global_depth == self.directory_max_depth {
                    debug!(
                        table = %self.name,
                        bucket = bucket_page_id.page_num(),
                        "directory saturated, insert rejected"
                    );
                    return Ok(false);
                }
                DirectoryPage::new(&mut *directory).incr_global_depth();
            }

            let split_index = DirectoryPage::new(&*directory).split_image_index(bucket_index);
            let new_local_depth = local_depth + 1;

            let guard = self.pool.new_page(AccessType::Index).await?;
            let new_bucket_page_id = guard.page_id();
            let mut new_bucket = guard.upgrade_write().await;
            BucketPage::<K, V, _>::new(&mut *new_bucket).init(self.bucket_max_size);

            debug!(
                table = %self.name,
                bucket = bucket_page_id.page_num(),
                image = new_bucket_page_id.page_num(),
                depth = new_local_depth,
                "splitting bucket"
            );

            // Move the entries whose hash bit at `local_depth` selects
            // the new side.
            {
                let mut old_view = BucketPage::<K, V, _>::new(&mut *bucket);
                let mut new_view = BucketPage::<K, V, _>::new(&mut *new_bucket);
                let bit = 1u32 << local_depth;
                let mut i = 0;
                while i < old_view.size() {
                    let entry_key = old_view.key_at(i);
                    if self.hasher.hash_key(&entry_key) & bit == split_index & bit {
                        let entry_value = old_view.value_at(i);
                        let moved = new_view.insert(&entry_key, &entry_value);
                        debug_assert!(moved);
                        old_view.remove_at(i);
                    } else {
                        i += 1;
                    }
                }
            }

            // Point every directory slot that shares the low
            // `new_local_depth` bits of either side at its bucket.
            {
                let mut dir = DirectoryPage::new(&mut *directory);
                let stride = 1u32 << new_local_depth;
                let count = 1u32 << (dir.global_depth() - new_local_depth);
                let old_base = bucket_index & (stride - 1);
                let new_base = split_index & (stride - 1);
                for i in 0..count {
                    dir.set_local_depth(old_base + i * stride, new_local_depth as u8);
                    dir.set_bucket_page_id(new_base + i * stride, new_bucket_page_id);
                    dir.set_local_depth(new_base + i * stride, new_local_depth as u8);
                }
            }
            #[cfg(debug_assertions)]
            DirectoryPage::new(&*directory).verify_integrity();

            // Re-resolve which side the key belongs to and retry.
            bucket_index = DirectoryPage::new(&*directory).hash_to_bucket_index(hash);
            let target_page_id = DirectoryPage::new(&*directory).bucket_page_id(bucket_index);
            if target_page_id == new_bucket_page_id {
                bucket = new_bucket;
            }
            bucket_page_id = target_page_id;
        }

        let inserted = BucketPage::<K, V, _>::new(&mut *bucket).insert(key, value);
        debug_assert!(inserted, "non-full bucket must accept a fresh key");
        Ok(inserted)
    }

    /// Removes `key`. Returns `Ok(false)` when the key is absent.
    pub async fn remove(&self, key: &K) -> Result<bool, BufferError> {
        let hash = self.hasher.hash_key(key);

        let header = self
            .pool
            .fetch_page_write(self.header_page_id, AccessType::Index)
            .await?;
        let directory_page_id = {
            let view = HeaderPage::new(&*header);
            view.directory_page_id(view.hash_to_directory_index(hash))
        };
        drop(header);
        if directory_page_id.is_invalid() {
            return Ok(false);
        }

        let mut directory = self
            .pool
            .fetch_page_write(directory_page_id, AccessType::Index)
            .await?;
        let bucket_index = DirectoryPage::new(&*directory).hash_to_bucket_index(hash);
        let bucket_page_id = DirectoryPage::new(&*directory).bucket_page_id(bucket_index);
        if bucket_page_id.is_invalid() {
            return Ok(false);
        }

        {
            let mut bucket = self
                .pool
                .fetch_page_write(bucket_page_id, AccessType::Index)
                .await?;
            if !BucketPage::<K, V, _>::new(&mut *bucket).remove(key) {
                return Ok(false);
            }
        }

        self.merge_and_shrink(&mut directory, bucket_index).await?;
        #[cfg(debug_assertions)]
        DirectoryPage::new(&*directory).verify_integrity();
        Ok(true)
    }

    /// Creates the first bucket of a directory and inserts into it.
    ///
    /// All live slots point at the new bucket with local depth 0.
    /// Besides fresh directories, this also runs when an earlier insert
    /// linked a directory into the header but then failed to allocate
    /// its first bucket, which happens whenever the pool is exhausted
    /// between the two page allocations; such a directory is still at
    /// global depth 0.
    async fn insert_into_new_bucket(
        &self,
        directory: &mut PageWriteGuard<'_, D>,
        bucket_index: u32,
        key: &K,
        value: &V,
    ) -> Result<bool, BufferError> {
        let guard = self.pool.new_page(AccessType::Index).await?;
        let bucket_page_id = guard.page_id();
        let mut bucket = guard.upgrade_write().await;
        BucketPage::<K, V, _>::new(&mut *bucket).init(self.bucket_max_size);

        {
            let mut dir = DirectoryPage::new(&mut **directory);
            for i in 0..dir.size() {
                dir.set_bucket_page_id(i, bucket_page_id);
                dir.set_local_depth(i, 0);
            }
        }
        debug!(
            table = %self.name,
            bucket = bucket_page_id.page_num(),
            slot = bucket_index,
            "created initial bucket"
        );

        let inserted = BucketPage::<K, V, _>::new(&mut *bucket).insert(key, value);
        debug_assert!(inserted, "fresh bucket must accept the first key");
        Ok(inserted)
    }

    /// Cascading merge after a removal, then directory shrinking.
    ///
    /// While the bucket and its split image share a local depth and
    /// either is empty, the non-empty side absorbs the empty one and
    /// the freed page is deleted. Afterwards the directory halves for
    /// as long as every slot keeps some slack.
    async fn merge_and_shrink(
        &self,
        directory: &mut PageWriteGuard<'_, D>,
        mut bucket_index: u32,
    ) -> Result<(), BufferError> {
        loop {
            let (bucket_page_id, sibling_index, sibling_page_id, local_depth) = {
                let dir = DirectoryPage::new(&**directory);
                let local_depth = dir.local_depth(bucket_index);
                if local_depth == 0 {
                    break;
                }
                let sibling_index = bucket_index ^ (1u32 << (local_depth - 1));
                if dir.local_depth(sibling_index) != local_depth {
                    break;
                }
                (
                    dir.bucket_page_id(bucket_index),
                    sibling_index,
                    dir.bucket_page_id(sibling_index),
                    local_depth,
                )
            };
            if bucket_page_id == sibling_page_id {
                break;
            }

            let bucket_empty = {
                let guard = self
                    .pool
                    .fetch_page_read(bucket_page_id, AccessType::Index)
                    .await?;
                BucketPage::<K, V, _>::new(&*guard).is_empty()
            };
            let sibling_empty = {
                let guard = self
                    .pool
                    .fetch_page_read(sibling_page_id, AccessType::Index)
                    .await?;
                BucketPage::<K, V, _>::new(&*guard).is_empty()
            };
            if !bucket_empty && !sibling_empty {
                break;
            }

            // The non-empty side absorbs the empty one (either side when
            // both are empty).
            let (keep_index, keep_page_id, dead_page_id) = if sibling_empty {
                (bucket_index, bucket_page_id, sibling_page_id)
            } else {
                (sibling_index, sibling_page_id, bucket_page_id)
            };
            let new_depth = local_depth - 1;

            debug!(
                table = %self.name,
                keep = keep_page_id.page_num(),
                dead = dead_page_id.page_num(),
                depth = new_depth,
                "merging buckets"
            );

            {
                let mut dir = DirectoryPage::new(&mut **directory);
                let stride = 1u32 << new_depth;
                let count = 1u32 << (dir.global_depth() - new_depth);
                let base = keep_index & (stride - 1);
                for i in 0..count {
                    dir.set_bucket_page_id(base + i * stride, keep_page_id);
                    dir.set_local_depth(base + i * stride, new_depth as u8);
                }
            }

            if !self.pool.delete_page(dead_page_id).await {
                debug!(
                    page = dead_page_id.page_num(),
                    "merged bucket still pinned, leaving its page"
                );
            }

            bucket_index = keep_index & ((1u32 << new_depth) - 1);
        }

        let mut dir = DirectoryPage::new(&mut **directory);
        while dir.can_shrink() {
            dir.decr_global_depth();
        }
        Ok(())
    }
}
