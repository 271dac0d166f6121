//! Frame - a slot in a buffer pool instance.
//!
//! A [`Frame`] is where a page lives while it is resident. Its state is a
//! small lifecycle: free → assigned to a page (pinned once, clean) →
//! pinned/unpinned some number of times, possibly dirtied → evicted or
//! cleared back to free. The methods here are those transitions; the pool
//! instance decides *when* they happen, under its own latch.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// A frame in the buffer pool.
///
/// # Thread Safety
/// The page contents sit behind the frame's page latch (`RwLock`), only
/// reachable through the pool's guards — so holding the latch always
/// implies holding a pin. The rest of the state is atomics: the resident
/// page id is stored raw with [`PageId::INVALID`] as the "free" sentinel
/// (the same encoding the directory page uses on disk), which lets the
/// guard-drop path run without taking any pool latch.
pub struct Frame {
    /// The page data, protected by the page latch.
    page: RwLock<Page>,

    /// Raw id of the resident page; `PageId::INVALID` when free.
    page_id: AtomicU32,

    /// Number of outstanding references to this frame.
    pin_count: AtomicU32,

    /// Whether the page has been modified since it was last written back.
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new free frame.
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new()),
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Acquire the page latch shared.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquire the page latch exclusive.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// The resident page, or `None` if the frame is free.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let raw = PageId::new(self.page_id.load(Ordering::Relaxed));
        raw.is_valid().then_some(raw)
    }

    /// Hand the frame to `page_id`: pinned once, clean.
    ///
    /// This is the transition a victim frame takes when `new_page` or a
    /// fetch miss claims it. The caller has already written the page
    /// contents (zeroes or the bytes read from disk) and evicted the
    /// previous occupant.
    ///
    /// # Panics
    /// Debug-asserts that no pins are outstanding; an eviction of a pinned
    /// frame is a pool bug.
    pub fn assign(&self, page_id: PageId) {
        debug_assert_eq!(self.pin_count(), 0, "assigning a pinned frame");
        debug_assert!(page_id.is_valid());
        self.page_id.store(page_id.0, Ordering::Relaxed);
        self.pin_count.store(1, Ordering::Relaxed);
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    /// Return the frame to the free state: zeroed page, no id, no pins,
    /// clean. Taken when the resident page is deleted.
    pub fn clear(&self) {
        self.page_mut().reset();
        self.page_id.store(PageId::INVALID.0, Ordering::Relaxed);
        self.pin_count.store(0, Ordering::Relaxed);
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    /// Take one more reference. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drop one reference, recording the holder's dirtiness verdict.
    ///
    /// `is_dirty` is OR-ed into the frame's dirty bit: within one
    /// residency it is set by whichever holder mutated the page and only
    /// write-back clears it. Returns the remaining pin count.
    ///
    /// # Panics
    /// Panics if the pin count is already 0; an unpin without a matching
    /// pin is a caller contract breach.
    #[inline]
    pub fn unpin(&self, is_dirty: bool) -> u32 {
        if is_dirty {
            self.is_dirty.store(true, Ordering::Relaxed);
        }
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    /// Check if the frame is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Check if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    /// Clear the dirty flag after a write-back.
    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
