//! Disk-backed extendible hash table.
//!
//! The table is one directory page plus a dynamic set of bucket pages, all
//! living in the buffer pool; the only in-memory state is the directory's
//! page id. A key hashes to 32 bits, the low `global_depth` bits pick a
//! directory slot, and the slot names the bucket page.
//!
//! # Latching
//! The directory page's own reader/writer latch doubles as the table latch:
//! point operations hold it shared while structural changes (split, grow,
//! merge, shrink) hold it exclusive. Bucket latches nest strictly inside
//! the directory latch, and the only place two bucket latches are held at
//! once is a split, which owns the directory exclusively at that point —
//! so the directory → bucket lock order is enforced by construction.
//!
//! Every page is reached through a pool guard, so each fetch is unpinned on
//! every exit path, and a page is reported dirty exactly when the operation
//! mutated it.

use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::buffer::BufferPool;
use crate::common::{Error, PageId, Result};
use crate::index::key::{HashFn, KeyComparator, StorageKey, StorageValue};
use crate::storage::page::{
    BucketView, BucketViewMut, DirectoryView, DirectoryViewMut, DIRECTORY_MAX_DEPTH,
};

/// A persistent hash table mapping fixed-width keys to fixed-width values.
///
/// Generic over the key, the value, the buffer pool backing it, the key
/// comparator, and the hash function. The same key may map to several
/// values; the exact `(key, value)` pair is unique.
pub struct ExtendibleHashTable<K, V, P, C, H> {
    pool: Arc<P>,
    directory_page_id: PageId,
    comparator: C,
    hash_fn: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, P, C, H> ExtendibleHashTable<K, V, P, C, H>
where
    K: StorageKey,
    V: StorageValue,
    P: BufferPool,
    C: KeyComparator<K>,
    H: HashFn<K>,
{
    /// Create a table with one empty bucket at depth zero.
    ///
    /// Allocates the directory page and the first bucket page; the pool
    /// must have room for two pinned pages during construction.
    pub fn new(pool: Arc<P>, comparator: C, hash_fn: H) -> Result<Self> {
        let directory_page_id;
        {
            let mut dir_guard = pool.new_page()?;
            directory_page_id = dir_guard.page_id();

            // A zeroed page is already a valid empty bucket, so the guard
            // is dropped without dirtying it.
            let bucket_page_id = pool.new_page()?.page_id();

            let mut dir = DirectoryViewMut::new(dir_guard.as_mut_slice());
            dir.init();
            dir.set_bucket_page_id(0, bucket_page_id);
            dir.set_local_depth(0, 0);
        }

        Ok(Self {
            pool,
            directory_page_id,
            comparator,
            hash_fn,
            _marker: PhantomData,
        })
    }

    /// Create a table using the default comparator and hash function.
    pub fn with_defaults(pool: Arc<P>) -> Result<Self>
    where
        C: Default,
        H: Default,
    {
        Self::new(pool, C::default(), H::default())
    }

    /// Page id of the directory page.
    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Collect every value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Vec<V>> {
        let dir_guard = self.pool.fetch_page_read(self.directory_page_id)?;
        let dir = DirectoryView::new(dir_guard.as_slice());
        let bucket_page_id = dir.bucket_page_id(dir.hash_to_bucket_index(self.hash(key)));

        let bucket_guard = self.pool.fetch_page_read(bucket_page_id)?;
        drop(dir_guard);

        let bucket = BucketView::<K, V>::new(bucket_guard.as_slice());
        let mut values = Vec::new();
        bucket.get_value(key, &self.comparator, &mut values);
        Ok(values)
    }

    /// Insert `(key, value)`.
    ///
    /// Returns `Ok(false)` if the exact pair is already present. A full
    /// bucket triggers a split (repeating until the pair fits); when the
    /// target bucket is full at maximum depth the insert fails with
    /// [`Error::DirectoryFull`].
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        {
            let dir_guard = self.pool.fetch_page_read(self.directory_page_id)?;
            let dir = DirectoryView::new(dir_guard.as_slice());
            let bucket_page_id = dir.bucket_page_id(dir.hash_to_bucket_index(self.hash(key)));

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id)?;
            let bucket = BucketView::<K, V>::new(bucket_guard.as_slice());
            if !bucket.is_full() {
                if bucket.contains(key, value, &self.comparator) {
                    return Ok(false);
                }
                let mut bucket = BucketViewMut::<K, V>::new(bucket_guard.as_mut_slice());
                let inserted = bucket.insert(key, value, &self.comparator);
                debug_assert!(inserted, "non-full bucket rejected an insert");
                return Ok(true);
            }
            // Bucket is full: drop both latches and retry with the
            // directory held exclusively.
        }
        self.split_insert(key, value)
    }

    /// Remove the exact `(key, value)` pair.
    ///
    /// Returns `Ok(false)` if it is not present. Emptying a bucket
    /// triggers a merge attempt with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let emptied;
        {
            let dir_guard = self.pool.fetch_page_read(self.directory_page_id)?;
            let dir = DirectoryView::new(dir_guard.as_slice());
            let bucket_page_id = dir.bucket_page_id(dir.hash_to_bucket_index(self.hash(key)));

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id)?;
            let slot = BucketView::<K, V>::new(bucket_guard.as_slice())
                .find(key, value, &self.comparator);
            match slot {
                None => return Ok(false),
                Some(slot) => {
                    let mut bucket = BucketViewMut::<K, V>::new(bucket_guard.as_mut_slice());
                    bucket.remove_at(slot);
                    emptied = bucket.as_view().is_empty();
                }
            }
        }

        if emptied {
            self.merge(key)?;
        }
        Ok(true)
    }

    /// Current number of hash bits the directory discriminates on.
    pub fn global_depth(&self) -> Result<u32> {
        let dir_guard = self.pool.fetch_page_read(self.directory_page_id)?;
        Ok(DirectoryView::new(dir_guard.as_slice()).global_depth())
    }

    /// Check directory invariants, panicking on violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let dir_guard = self.pool.fetch_page_read(self.directory_page_id)?;
        DirectoryView::new(dir_guard.as_slice()).verify_integrity();
        Ok(())
    }

    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.hash_key(key)
    }

    /// Insert path for a full bucket: split under the exclusive directory
    /// latch until the pair fits.
    ///
    /// Each round recomputes the target (the directory may have changed
    /// since the latches were dropped), grows the directory when the
    /// bucket's local depth has caught up with the global depth, carves the
    /// bucket's cohort in two, and redistributes entries by their new
    /// directory mapping. A degenerate key distribution can leave the
    /// target side still full, in which case the loop splits again; at
    /// maximum depth the insert surfaces [`Error::DirectoryFull`] instead.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool> {
        let mut dir_guard = self.pool.fetch_page_write(self.directory_page_id)?;

        loop {
            let (bucket_idx, bucket_page_id) = {
                let dir = DirectoryView::new(dir_guard.as_slice());
                let idx = dir.hash_to_bucket_index(self.hash(key));
                (idx, dir.bucket_page_id(idx))
            };

            let mut bucket_guard = self.pool.fetch_page_write(bucket_page_id)?;

            {
                let bucket = BucketView::<K, V>::new(bucket_guard.as_slice());
                if bucket.contains(key, value, &self.comparator) {
                    return Ok(false);
                }
                if !bucket.is_full() {
                    let mut bucket =
                        BucketViewMut::<K, V>::new(bucket_guard.as_mut_slice());
                    let inserted = bucket.insert(key, value, &self.comparator);
                    debug_assert!(inserted, "non-full bucket rejected an insert");
                    return Ok(true);
                }
            }

            let local_depth = DirectoryView::new(dir_guard.as_slice()).local_depth(bucket_idx);
            if local_depth == DIRECTORY_MAX_DEPTH {
                return Err(Error::DirectoryFull);
            }
            if local_depth == DirectoryView::new(dir_guard.as_slice()).global_depth() {
                DirectoryViewMut::new(dir_guard.as_mut_slice()).incr_global_depth();
            }

            let mut split_guard = self.pool.new_page()?;
            let split_page_id = split_guard.page_id();

            // Deepen the cohort and hand the half on the far side of the
            // newly significant bit to the new page.
            let new_depth = local_depth + 1;
            let high_bit = 1u32 << local_depth;
            let idx_bit = (bucket_idx as u32) & high_bit;
            {
                let size = DirectoryView::new(dir_guard.as_slice()).size();
                let mut dir = DirectoryViewMut::new(dir_guard.as_mut_slice());
                for i in 0..size {
                    if dir.as_view().bucket_page_id(i) == bucket_page_id {
                        dir.set_local_depth(i, new_depth);
                        if ((i as u32) & high_bit) != idx_bit {
                            dir.set_bucket_page_id(i, split_page_id);
                        }
                    }
                }
            }

            // Re-index every live entry under the updated directory; the
            // ones that now map to the new page move.
            let movers: Vec<(usize, K, V)> = {
                let dir = DirectoryView::new(dir_guard.as_slice());
                let bucket = BucketView::<K, V>::new(bucket_guard.as_slice());
                bucket
                    .entries()
                    .into_iter()
                    .filter(|(_, k, _)| {
                        dir.bucket_page_id(dir.hash_to_bucket_index(self.hash(k)))
                            == split_page_id
                    })
                    .collect()
            };

            debug!(
                "split {}: depth {} -> {}, {} entries move to {}",
                bucket_page_id,
                local_depth,
                new_depth,
                movers.len(),
                split_page_id
            );

            if !movers.is_empty() {
                let mut old_bucket = BucketViewMut::<K, V>::new(bucket_guard.as_mut_slice());
                for (slot, _, _) in &movers {
                    old_bucket.remove_at(*slot);
                }
                let mut split_bucket =
                    BucketViewMut::<K, V>::new(split_guard.as_mut_slice());
                for (_, k, v) in &movers {
                    let moved = split_bucket.insert(k, v, &self.comparator);
                    debug_assert!(moved, "fresh split page rejected an insert");
                }
            }

            // Place the caller's pair on whichever side it maps to now.
            let target_page_id = {
                let dir = DirectoryView::new(dir_guard.as_slice());
                dir.bucket_page_id(dir.hash_to_bucket_index(self.hash(key)))
            };

            let inserted = if target_page_id == split_page_id {
                if BucketView::<K, V>::new(split_guard.as_slice()).is_full() {
                    false
                } else {
                    BucketViewMut::<K, V>::new(split_guard.as_mut_slice())
                        .insert(key, value, &self.comparator)
                }
            } else {
                if BucketView::<K, V>::new(bucket_guard.as_slice()).is_full() {
                    false
                } else {
                    BucketViewMut::<K, V>::new(bucket_guard.as_mut_slice())
                        .insert(key, value, &self.comparator)
                }
            };

            if inserted {
                return Ok(true);
            }
            // Every key collided on the same side and it is still full:
            // the next round splits that side further.
        }
    }

    /// Fold an emptied bucket back into its split image.
    ///
    /// Runs under the exclusive directory latch. Merging is skipped when
    /// the bucket's depth is zero, when bucket and image share a page,
    /// when their depths differ, or when the bucket turns out not to be
    /// empty after all — the emptiness observed by `remove` is stale by
    /// the time this latch is held, so it is re-checked here.
    fn merge(&self, key: &K) -> Result<()> {
        let mut dir_guard = self.pool.fetch_page_write(self.directory_page_id)?;

        let (bucket_page_id, split_page_id) = {
            let dir = DirectoryView::new(dir_guard.as_slice());
            let bucket_idx = dir.hash_to_bucket_index(self.hash(key));

            if dir.local_depth(bucket_idx) == 0 {
                return Ok(());
            }
            let split_idx = dir.split_image_index(bucket_idx);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let split_page_id = dir.bucket_page_id(split_idx);

            if bucket_page_id == split_page_id
                || dir.local_depth(bucket_idx) != dir.local_depth(split_idx)
            {
                return Ok(());
            }
            (bucket_page_id, split_page_id)
        };

        {
            let bucket_guard = self.pool.fetch_page_read(bucket_page_id)?;
            if !BucketView::<K, V>::new(bucket_guard.as_slice()).is_empty() {
                return Ok(());
            }
        }

        {
            let size = DirectoryView::new(dir_guard.as_slice()).size();
            let mut dir = DirectoryViewMut::new(dir_guard.as_mut_slice());
            for i in 0..size {
                if dir.as_view().bucket_page_id(i) == bucket_page_id {
                    dir.set_bucket_page_id(i, split_page_id);
                }
                if dir.as_view().bucket_page_id(i) == split_page_id {
                    dir.decr_local_depth(i);
                }
            }
            while dir.as_view().can_shrink() {
                dir.decr_global_depth();
            }
        }

        debug!("merged {} into {}", bucket_page_id, split_page_id);

        drop(dir_guard);
        // Best-effort: a racing reader may still pin the emptied page, in
        // which case the delete reports false and the page is orphaned
        // until the id space learns to recycle.
        self.pool.delete_page(bucket_page_id)?;
        Ok(())
    }
}
