//! Directory page of the extendible hash table.
//!
//! The directory maps the low `global_depth` bits of a key's hash to a
//! bucket page id. It is stored in a single page and interpreted through
//! [`DirectoryView`] / [`DirectoryViewMut`], which read and write fixed
//! little-endian offsets instead of transmuting the buffer.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     global_depth (u32)
//! 4       2048  bucket_page_ids[512] (u32 each)
//! 2052    512   local_depths[512] (u8 each)
//! ```
//! Only the first `1 << global_depth` slots are live; the rest carry
//! whatever the last shrink left behind.

use log::warn;

use crate::common::PageId;

/// Deepest the directory can discriminate; bounds the slot arrays so the
/// whole structure fits in one 4KB page.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;

/// Number of slots backing the directory (`1 << DIRECTORY_MAX_DEPTH`).
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

const GLOBAL_DEPTH_OFFSET: usize = 0;
const BUCKET_PAGE_IDS_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

/// Total bytes the directory occupies at the front of its page.
pub const DIRECTORY_PAGE_BYTES: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Read-only view over a directory page's bytes.
#[derive(Clone, Copy)]
pub struct DirectoryView<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryView<'a> {
    /// Wrap a page buffer.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than the directory layout.
    pub fn new(data: &'a [u8]) -> Self {
        assert!(data.len() >= DIRECTORY_PAGE_BYTES, "buffer too small for directory");
        Self { data }
    }

    /// Number of hash bits the directory currently discriminates on.
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Number of live directory slots (`1 << global_depth`).
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Mask selecting the hash bits the directory discriminates on.
    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Directory slot a hash value lands in.
    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    /// Bucket page id stored in a slot.
    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        let off = BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx;
        PageId::new(u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()))
    }

    /// Local depth of the bucket a slot points at.
    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx] as u32
    }

    /// Mask selecting the hash bits a slot's bucket discriminates on.
    pub fn local_depth_mask(&self, bucket_idx: usize) -> u32 {
        (1 << self.local_depth(bucket_idx)) - 1
    }

    /// The sibling slot that this slot would merge with.
    ///
    /// For a slot with local depth `d > 0` that is the slot differing only
    /// in bit `d - 1`; at depth 0 the (degenerate) image flips the bit the
    /// next grow would introduce.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        let local_depth = self.local_depth(bucket_idx);
        if local_depth == 0 {
            bucket_idx ^ (1 << self.global_depth())
        } else {
            bucket_idx ^ (1 << (local_depth - 1))
        }
    }

    /// Whether the directory can drop its top bit: true iff no live slot
    /// uses all `global_depth` bits.
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < global_depth)
    }

    /// Check the directory's structural invariants, panicking on violation:
    ///
    /// 1. every live slot has `local_depth <= global_depth`;
    /// 2. a bucket with local depth `d` is pointed at by exactly
    ///    `1 << (global_depth - d)` slots;
    /// 3. slots sharing a bucket page id agree on its local depth.
    pub fn verify_integrity(&self) {
        use std::collections::HashMap;

        let global_depth = self.global_depth();
        let size = self.size();

        let mut counts: HashMap<PageId, usize> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..size {
            let local_depth = self.local_depth(i);
            assert!(
                local_depth <= global_depth,
                "local depth {} exceeds global depth {} at slot {}",
                local_depth,
                global_depth,
                i
            );

            let page_id = self.bucket_page_id(i);
            *counts.entry(page_id).or_insert(0) += 1;
            match depths.get(&page_id) {
                None => {
                    depths.insert(page_id, local_depth);
                }
                Some(&d) => assert_eq!(
                    d, local_depth,
                    "slots sharing {} disagree on local depth",
                    page_id
                ),
            }
        }

        for (page_id, count) in counts {
            let expected = 1usize << (global_depth - depths[&page_id]);
            assert_eq!(
                count, expected,
                "{} is referenced by {} slots, expected {}",
                page_id, count, expected
            );
        }
    }
}

/// Mutable view over a directory page's bytes.
pub struct DirectoryViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryViewMut<'a> {
    /// Wrap a page buffer.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than the directory layout.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(data.len() >= DIRECTORY_PAGE_BYTES, "buffer too small for directory");
        Self { data }
    }

    /// Read-only view over the same bytes.
    pub fn as_view(&self) -> DirectoryView<'_> {
        DirectoryView { data: self.data }
    }

    /// Initialize a fresh directory: depth 0, every slot invalid.
    pub fn init(&mut self) {
        self.set_global_depth(0);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            self.set_bucket_page_id(i, PageId::INVALID);
            self.set_local_depth(i, 0);
        }
    }

    /// Store a bucket page id in a slot.
    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, page_id: PageId) {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        let off = BUCKET_PAGE_IDS_OFFSET + 4 * bucket_idx;
        self.data[off..off + 4].copy_from_slice(&page_id.0.to_le_bytes());
    }

    /// Store a slot's local depth.
    pub fn set_local_depth(&mut self, bucket_idx: usize, local_depth: u32) {
        debug_assert!(bucket_idx < DIRECTORY_ARRAY_SIZE);
        debug_assert!(local_depth <= DIRECTORY_MAX_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx] = local_depth as u8;
    }

    /// Decrement a slot's local depth.
    pub fn decr_local_depth(&mut self, bucket_idx: usize) {
        let depth = self.as_view().local_depth(bucket_idx);
        if depth == 0 {
            warn!("local depth of slot {} is already zero", bucket_idx);
            return;
        }
        self.set_local_depth(bucket_idx, depth - 1);
    }

    /// Double the directory: every new slot `i | (1 << old_depth)` inherits
    /// the bucket page id and local depth of its low-half partner.
    ///
    /// # Panics
    /// Panics when the directory is already at [`DIRECTORY_MAX_DEPTH`]; the
    /// caller checks before growing.
    pub fn incr_global_depth(&mut self) {
        let old_depth = self.as_view().global_depth();
        assert!(
            old_depth < DIRECTORY_MAX_DEPTH,
            "directory cannot grow past max depth"
        );

        let old_size = 1usize << old_depth;
        for i in 0..old_size {
            let page_id = self.as_view().bucket_page_id(i);
            let local_depth = self.as_view().local_depth(i);
            let new_slot = i | (1 << old_depth);
            self.set_bucket_page_id(new_slot, page_id);
            self.set_local_depth(new_slot, local_depth);
        }
        self.set_global_depth(old_depth + 1);
    }

    /// Halve the directory by dropping its top bit. Legal only while
    /// [`DirectoryView::can_shrink`] holds; the truncated upper half keeps
    /// its stale bytes, which the next grow overwrites.
    pub fn decr_global_depth(&mut self) {
        let depth = self.as_view().global_depth();
        assert!(depth > 0, "directory is already at depth zero");
        self.set_global_depth(depth - 1);
    }

    fn set_global_depth(&mut self, global_depth: u32) {
        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&global_depth.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    fn page_buf() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_layout_fits_in_page() {
        assert!(DIRECTORY_PAGE_BYTES <= PAGE_SIZE);
        assert_eq!(DIRECTORY_ARRAY_SIZE, 512);
    }

    #[test]
    fn test_byte_layout() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        dir.incr_global_depth();
        dir.set_bucket_page_id(1, PageId::new(0x04030201));
        dir.set_local_depth(1, 3);

        assert_eq!(buf[0], 1); // global_depth LSB
        assert_eq!(&buf[4 + 4..4 + 8], &[0x01, 0x02, 0x03, 0x04]); // slot 1 page id, LE
        assert_eq!(buf[2052 + 1], 3); // slot 1 local depth
    }

    #[test]
    fn test_init_state() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();

        let view = dir.as_view();
        assert_eq!(view.global_depth(), 0);
        assert_eq!(view.size(), 1);
        assert_eq!(view.global_depth_mask(), 0);
        assert_eq!(view.bucket_page_id(0), PageId::INVALID);
        assert_eq!(view.local_depth(0), 0);
    }

    #[test]
    fn test_hash_to_bucket_index_uses_low_bits() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        dir.incr_global_depth();
        dir.incr_global_depth();

        let view = dir.as_view();
        assert_eq!(view.global_depth_mask(), 0b11);
        assert_eq!(view.hash_to_bucket_index(0b10110), 0b10);
        assert_eq!(view.hash_to_bucket_index(0b10101), 0b01);
    }

    #[test]
    fn test_grow_copies_low_half() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        dir.incr_global_depth();
        dir.set_bucket_page_id(0, PageId::new(10));
        dir.set_local_depth(0, 1);
        dir.set_bucket_page_id(1, PageId::new(11));
        dir.set_local_depth(1, 1);

        dir.incr_global_depth();

        let view = dir.as_view();
        assert_eq!(view.global_depth(), 2);
        assert_eq!(view.size(), 4);
        assert_eq!(view.bucket_page_id(2), PageId::new(10));
        assert_eq!(view.local_depth(2), 1);
        assert_eq!(view.bucket_page_id(3), PageId::new(11));
        assert_eq!(view.local_depth(3), 1);
        view.verify_integrity();
    }

    #[test]
    fn test_split_image_symmetry() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        for _ in 0..3 {
            dir.incr_global_depth();
        }
        for i in 0..8 {
            dir.set_local_depth(i, 3);
        }

        let view = dir.as_view();
        for i in 0..8 {
            assert_eq!(view.split_image_index(view.split_image_index(i)), i);
        }
        assert_eq!(view.split_image_index(0b000), 0b100);
        assert_eq!(view.split_image_index(0b101), 0b001);
    }

    #[test]
    fn test_split_image_uses_local_depth() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        for _ in 0..3 {
            dir.incr_global_depth();
        }

        dir.set_local_depth(0b110, 2);
        assert_eq!(dir.as_view().split_image_index(0b110), 0b100);

        dir.set_local_depth(0b110, 1);
        assert_eq!(dir.as_view().split_image_index(0b110), 0b111);
    }

    #[test]
    fn test_can_shrink() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        assert!(!dir.as_view().can_shrink()); // depth 0 can't shrink

        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        assert!(!dir.as_view().can_shrink());

        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        assert!(dir.as_view().can_shrink());

        dir.decr_global_depth();
        assert_eq!(dir.as_view().global_depth(), 0);
        assert!(!dir.as_view().can_shrink());
    }

    #[test]
    #[should_panic(expected = "cannot grow past max depth")]
    fn test_grow_past_max_depth_panics() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        for _ in 0..=DIRECTORY_MAX_DEPTH {
            dir.incr_global_depth();
        }
    }

    #[test]
    #[should_panic(expected = "disagree on local depth")]
    fn test_verify_integrity_catches_depth_mismatch() {
        let mut buf = page_buf();
        let mut dir = DirectoryViewMut::new(&mut buf);
        dir.init();
        dir.incr_global_depth();
        dir.set_bucket_page_id(0, PageId::new(10));
        dir.set_bucket_page_id(1, PageId::new(10));
        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 1);
        dir.as_view().verify_integrity();
    }
}
