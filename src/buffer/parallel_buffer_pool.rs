//! Parallel Buffer Pool - a sharding front-end over pool instances.
//!
//! Routes every page-addressed operation to the instance owning that page
//! (`page_id % num_instances`), so unrelated requests hit different latches.
//! Allocation rotates across instances to spread fresh pages evenly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferPool, BufferPoolInstance, PageReadGuard, PageWriteGuard, StatsSnapshot};
use crate::common::{Error, PageId, Result};
use crate::storage::DiskManager;

/// A fan-out over N [`BufferPoolInstance`]s sharing one disk file.
///
/// Each instance allocates page ids in its own modular stride
/// (`id % N == instance_index`), which makes the routing function and the
/// allocation function agree without any shared allocation state.
///
/// The pool itself carries no mutable state beyond the rotation cursor for
/// `new_page`, and racing on that cursor is benign: it is only a hint for
/// where to start probing.
pub struct ParallelBufferPool {
    instances: Vec<BufferPoolInstance>,
    /// Next instance to try first for `new_page`; advanced on every call so
    /// imbalance from failed probes heals over time.
    cursor: AtomicUsize,
}

impl ParallelBufferPool {
    /// Create a pool of `num_instances` shards with `pool_size` frames each.
    ///
    /// # Panics
    /// Panics if `num_instances` or `pool_size` is 0 (via the instance
    /// constructor), or if `num_instances` does not fit in `u32`.
    pub fn new(num_instances: usize, pool_size: usize, disk: Arc<Mutex<DiskManager>>) -> Self {
        let total = u32::try_from(num_instances).expect("num_instances must fit in u32");
        let instances = (0..total)
            .map(|i| BufferPoolInstance::with_sharding(pool_size, total, i, Arc::clone(&disk)))
            .collect();

        Self {
            instances,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The instance responsible for `page_id`.
    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id.0 as usize % self.instances.len()]
    }

    /// Allocate a new page on whichever instance has room.
    ///
    /// Starts at the rotation cursor and probes each instance once;
    /// `Error::NoFreeFrames` only when every instance is exhausted.
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let n = self.instances.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let instance = &self.instances[(start + offset) % n];
            match instance.new_page() {
                Ok(guard) => return Ok(guard),
                Err(Error::NoFreeFrames) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoFreeFrames)
    }

    /// Fetch a page for shared access from its owning instance.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        self.instance_for(page_id).fetch_page_read(page_id)
    }

    /// Fetch a page for exclusive access from its owning instance.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        self.instance_for(page_id).fetch_page_write(page_id)
    }

    /// Unpin a page on its owning instance.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    /// Flush a page on its owning instance.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).flush_page(page_id)
    }

    /// Flush every resident dirty page across all instances.
    pub fn flush_all_pages(&self) -> Result<()> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    /// Delete a page on its owning instance.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        self.instance_for(page_id).delete_page(page_id)
    }

    /// Total frame count across all instances.
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    /// Number of shards.
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Aggregated statistics across all instances.
    pub fn stats(&self) -> StatsSnapshot {
        self.instances
            .iter()
            .map(|i| i.stats().snapshot())
            .fold(StatsSnapshot::default(), |acc, s| acc.merge(&s))
    }
}

impl BufferPool for ParallelBufferPool {
    fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        ParallelBufferPool::new_page(self)
    }

    fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        ParallelBufferPool::fetch_page_read(self, page_id)
    }

    fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        ParallelBufferPool::fetch_page_write(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<bool> {
        ParallelBufferPool::delete_page(self, page_id)
    }

    fn flush_page(&self, page_id: PageId) -> Result<bool> {
        ParallelBufferPool::flush_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<()> {
        ParallelBufferPool::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPool::pool_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_pool(num_instances: usize, pool_size: usize) -> (ParallelBufferPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let disk = Arc::new(Mutex::new(DiskManager::create(&path).unwrap()));
        (ParallelBufferPool::new(num_instances, pool_size, disk), dir)
    }

    #[test]
    fn test_pool_size_is_total() {
        let (pool, _dir) = create_pool(4, 2);
        assert_eq!(pool.pool_size(), 8);
        assert_eq!(pool.num_instances(), 4);
    }

    #[test]
    fn test_allocation_rotates_across_instances() {
        let (pool, _dir) = create_pool(4, 2);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let guard = pool.new_page().unwrap();
            seen.insert(guard.page_id().0 % 4);
        }
        // Round-robin start points: four allocations land on four shards.
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_new_page_falls_over_to_free_instance() {
        let (pool, _dir) = create_pool(2, 1);

        // Pin both shards' only frames.
        let g0 = pool.new_page().unwrap();
        let g1 = pool.new_page().unwrap();
        assert!(matches!(pool.new_page(), Err(Error::NoFreeFrames)));

        let freed_shard = g1.page_id().0 % 2;
        drop(g1);
        // One shard has room again; the probe must find it regardless of
        // where the cursor starts.
        let g2 = pool.new_page().unwrap();
        assert_eq!(g2.page_id().0 % 2, freed_shard);
        drop(g0);
    }

    #[test]
    fn test_routing_by_modulus() {
        let (pool, _dir) = create_pool(4, 2);

        let mut pids = vec![];
        for _ in 0..8 {
            let mut guard = pool.new_page().unwrap();
            let pid = guard.page_id();
            guard.as_mut_slice()[0] = pid.0 as u8;
            pids.push(pid);
        }

        for pid in pids {
            let guard = pool.fetch_page_read(pid).unwrap();
            assert_eq!(guard.as_slice()[0], pid.0 as u8);
        }
    }

    #[test]
    fn test_flush_all_fans_out() {
        let (pool, _dir) = create_pool(2, 4);

        for i in 0..4u8 {
            let mut guard = pool.new_page().unwrap();
            guard.as_mut_slice()[0] = i;
        }

        pool.flush_all_pages().unwrap();
        assert_eq!(pool.stats().pages_written, 4);
    }
}
