//! RAII guards for page access.
//!
//! A fetched page is conceptually borrowed from the pool: the fetch pinned
//! it and took its page latch, and both must be released on every exit path.
//! These guards tie the two together so a leaked pin is impossible:
//!
//! - [`PageReadGuard`] — shared access; unpins clean on drop
//! - [`PageWriteGuard`] — exclusive access; records whether the page was
//!   ever mutably borrowed and reports exactly that as the dirtiness
//!   verdict on drop
//!
//! The write guard's tracking gives the "dirty iff mutated" contract for
//! free: an operation that takes the exclusive latch but only reads (a
//! duplicate-check that fails, a merge that aborts) unpins the page clean.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::FrameId;
use crate::common::PageId;
use crate::storage::page::Page;

use super::buffer_pool_instance::BufferPoolInstance;

/// Guard for shared page access.
///
/// Multiple read guards can exist for the same page simultaneously. The
/// page is unpinned (clean) when the guard drops.
pub struct PageReadGuard<'a> {
    /// Owning instance, for the unpin on drop.
    pool: &'a BufferPoolInstance,
    frame_id: FrameId,
    page_id: PageId,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolInstance,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            lock,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page_internal(self.frame_id, false);
    }
}

/// Guard for exclusive page access.
///
/// Only one write guard can exist for a page at a time. On drop the page is
/// unpinned with `dirty == true` iff [`DerefMut`] was ever used; reading
/// through the guard leaves the page clean.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolInstance,
    frame_id: FrameId,
    page_id: PageId,
    /// Set the first time the caller takes a mutable borrow of the page.
    dirtied: bool,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolInstance,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            dirtied: false,
            lock,
        }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Whether this guard has handed out a mutable borrow yet.
    #[inline]
    pub fn is_dirtied(&self) -> bool {
        self.dirtied
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        self.dirtied = true;
        &mut self.lock
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page_internal(self.frame_id, self.dirtied);
    }
}
