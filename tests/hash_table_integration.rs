//! Integration tests for the extendible hash table, including the
//! grow-to-saturation and delete-to-empty scenarios and a randomized
//! workload checked against a model.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum::index::hash::{BucketPage, DirectoryPage, HeaderPage};
use stratum::index::{DefaultKeyHash, ExtendibleHashTable, HashTableConfig, IdentityKeyHash};
use stratum::storage::{AccessType, BufferPool, BufferPoolConfig, MemoryDisk, PageId};

fn pool(pool_size: usize) -> Arc<BufferPool<MemoryDisk>> {
    Arc::new(BufferPool::new(
        Arc::new(MemoryDisk::new()),
        BufferPoolConfig {
            pool_size,
            replacer_k: 2,
            io_workers: 1,
        },
    ))
}

async fn identity_table(
    pool: Arc<BufferPool<MemoryDisk>>,
    directory_max_depth: u32,
    bucket_max_size: u32,
) -> ExtendibleHashTable<u32, u64, MemoryDisk, IdentityKeyHash> {
    ExtendibleHashTable::new("identity", pool, IdentityKeyHash, HashTableConfig {
        header_max_depth: 0,
        directory_max_depth,
        bucket_max_size,
    })
    .await
    .unwrap()
}

/// Walks header and directory pages to report (global_depth, bucket
/// page ids, bucket sizes) of the single directory.
async fn directory_snapshot(
    pool: &BufferPool<MemoryDisk>,
    header_page_id: PageId,
) -> Option<(u32, Vec<PageId>, Vec<u32>)> {
    let header = pool
        .fetch_page_read(header_page_id, AccessType::Index)
        .await
        .unwrap();
    let directory_page_id = HeaderPage::new(&*header).directory_page_id(0);
    drop(header);
    if directory_page_id.is_invalid() {
        return None;
    }

    let directory = pool
        .fetch_page_read(directory_page_id, AccessType::Index)
        .await
        .unwrap();
    let view = DirectoryPage::new(&*directory);
    let global_depth = view.global_depth();
    let bucket_ids: Vec<PageId> = (0..view.size()).map(|i| view.bucket_page_id(i)).collect();
    drop(directory);

    let mut sizes = Vec::new();
    for &bucket_id in &bucket_ids {
        let bucket = pool
            .fetch_page_read(bucket_id, AccessType::Index)
            .await
            .unwrap();
        sizes.push(BucketPage::<u32, u64, _>::new(&*bucket).size());
    }
    Some((global_depth, bucket_ids, sizes))
}

/// Insert keys 0..8 with the identity hash into buckets of two: the
/// directory grows to depth 2, every key is retrievable, and the next
/// colliding key is rejected as saturated.
#[tokio::test]
async fn test_insert_grows_directory_to_saturation() {
    let pool = pool(32);
    let table = identity_table(Arc::clone(&pool), 2, 2).await;

    for key in 0..8u32 {
        assert!(
            table.insert(&key, &(key as u64 * 10)).await.unwrap(),
            "key {} must fit",
            key
        );
    }
    for key in 0..8u32 {
        assert_eq!(table.get(&key).await.unwrap(), Some(key as u64 * 10));
    }

    let (global_depth, _, sizes) = directory_snapshot(&pool, table.header_page_id())
        .await
        .expect("directory exists");
    assert_eq!(global_depth, 2);
    assert_eq!(sizes, vec![2, 2, 2, 2]);

    // Key 8 routes to the full bucket of {0, 4} at maximum depth.
    assert!(!table.insert(&8, &80).await.unwrap());
    assert_eq!(table.get(&8).await.unwrap(), None);
    for key in 0..8u32 {
        assert_eq!(
            table.get(&key).await.unwrap(),
            Some(key as u64 * 10),
            "rejected insert must not disturb key {}",
            key
        );
    }
}

/// Removing everything merges buckets back together and shrinks the
/// directory to global depth 0 with one empty bucket.
#[tokio::test]
async fn test_remove_shrinks_directory_to_empty() {
    let pool = pool(32);
    let table = identity_table(Arc::clone(&pool), 2, 2).await;

    for key in 0..8u32 {
        assert!(table.insert(&key, &(key as u64)).await.unwrap());
    }
    for key in 0..8u32 {
        assert!(table.remove(&key).await.unwrap(), "key {} must remove", key);
    }
    for key in 0..8u32 {
        assert_eq!(table.get(&key).await.unwrap(), None);
    }

    let (global_depth, bucket_ids, sizes) = directory_snapshot(&pool, table.header_page_id())
        .await
        .expect("directory exists");
    assert_eq!(global_depth, 0, "directory must shrink to depth 0");
    assert_eq!(bucket_ids.len(), 1);
    assert_eq!(sizes, vec![0], "the last bucket must be empty");
}

/// Insert-then-remove in the same order leaves nothing behind.
#[tokio::test]
async fn test_insert_get_remove_law() {
    let table = identity_table(pool(32), 3, 3).await;

    for key in [3u32, 1, 4, 5, 9, 2, 6] {
        assert!(table.insert(&key, &(key as u64 + 1000)).await.unwrap());
    }
    // A duplicate is rejected without touching the stored value.
    assert!(!table.insert(&1, &0).await.unwrap());

    for key in [3u32, 4, 1, 5, 9, 2, 6] {
        assert_eq!(table.get(&key).await.unwrap(), Some(key as u64 + 1000));
        assert!(table.remove(&key).await.unwrap());
        assert_eq!(table.get(&key).await.unwrap(), None);
    }
}

/// Randomized workload cross-checked against a HashMap model, with the
/// default byte hash and a pool small enough to force eviction.
#[tokio::test]
async fn test_randomized_against_model() {
    let table: ExtendibleHashTable<u64, u64, MemoryDisk> = ExtendibleHashTable::new(
        "model-check",
        pool(16),
        DefaultKeyHash,
        HashTableConfig {
            header_max_depth: 1,
            directory_max_depth: 9,
            bucket_max_size: 8,
        },
    )
    .await
    .unwrap();

    let mut model: HashMap<u64, u64> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for _ in 0..2000 {
        let key = rng.gen_range(0..100u64);
        match rng.gen_range(0..3) {
            0 => {
                let value = rng.r#gen::<u64>();
                let inserted = table.insert(&key, &value).await.unwrap();
                assert_eq!(inserted, !model.contains_key(&key), "insert({})", key);
                model.entry(key).or_insert(value);
            }
            1 => {
                let removed = table.remove(&key).await.unwrap();
                assert_eq!(removed, model.remove(&key).is_some(), "remove({})", key);
            }
            _ => {
                assert_eq!(
                    table.get(&key).await.unwrap(),
                    model.get(&key).copied(),
                    "get({})",
                    key
                );
            }
        }
    }

    // Final sweep.
    for key in 0..100u64 {
        assert_eq!(table.get(&key).await.unwrap(), model.get(&key).copied());
    }
}

/// Concurrent readers over a static table.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers() {
    let table: Arc<ExtendibleHashTable<u32, u64, MemoryDisk, IdentityKeyHash>> =
        Arc::new(identity_table(pool(64), 5, 4).await);

    for key in 0..64u32 {
        assert!(table.insert(&key, &(key as u64 * 3)).await.unwrap());
    }

    let mut handles = vec![];
    for worker in 0..8u32 {
        let table = Arc::clone(&table);
        handles.push(tokio::spawn(async move {
            for round in 0..64u32 {
                let key = (worker * 13 + round) % 64;
                assert_eq!(table.get(&key).await.unwrap(), Some(key as u64 * 3));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}
