//! Bucket page of the extendible hash table.
//!
//! A bucket page holds up to `bucket_array_size::<K, V>()` key/value pairs
//! in a flat array, preceded by two bitmaps:
//!
//! - `occupied[i]` — slot *i* has held a live entry at some point since the
//!   page was allocated (tombstones keep it set)
//! - `readable[i]` — slot *i* holds a live entry right now
//!
//! `readable[i]` implies `occupied[i]`, and because inserts always fill the
//! first non-readable slot and removes only clear `readable`, the occupied
//! bits form a prefix of the page. Scans exploit that: the first clear
//! occupied bit ends the scan.
//!
//! # Layout
//! ```text
//! Offset            Size              Field
//! ------            ----              -----
//! 0                 ceil(N/8)         occupied bitmap
//! ceil(N/8)         ceil(N/8)         readable bitmap
//! 2*ceil(N/8)       N * entry_size    (key, value) pairs
//! ```
//! Bitmaps are little-bit-endian: slot *i* is bit `i % 8` of byte `i / 8`.
//! `N` is sized so the structure fills a page:
//! `N = 4 * PAGE_SIZE / (4 * entry_size + 1)` (each entry costs its bytes
//! plus two bits of bitmap).

use std::marker::PhantomData;

use crate::common::config::PAGE_SIZE;
use crate::index::key::{KeyComparator, StorageKey, StorageValue};

/// Number of `(key, value)` pairs a bucket page holds for this
/// instantiation.
pub const fn bucket_array_size<K: StorageKey, V: StorageValue>() -> usize {
    (4 * PAGE_SIZE) / (4 * (K::ENCODED_SIZE + V::ENCODED_SIZE) + 1)
}

const fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

/// Read-only view over a bucket page's bytes.
pub struct BucketView<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: StorageKey, V: StorageValue> BucketView<'a, K, V> {
    const CAPACITY: usize = bucket_array_size::<K, V>();
    const BITMAP_BYTES: usize = bitmap_bytes(Self::CAPACITY);
    const READABLE_OFFSET: usize = Self::BITMAP_BYTES;
    const PAIRS_OFFSET: usize = 2 * Self::BITMAP_BYTES;
    const ENTRY_SIZE: usize = K::ENCODED_SIZE + V::ENCODED_SIZE;

    /// Wrap a page buffer.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than the bucket layout.
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= Self::PAIRS_OFFSET + Self::CAPACITY * Self::ENTRY_SIZE,
            "buffer too small for bucket"
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Number of slots in the bucket.
    pub fn capacity(&self) -> usize {
        Self::CAPACITY
    }

    /// Whether slot `i` has ever held a live entry.
    pub fn is_occupied(&self, i: usize) -> bool {
        debug_assert!(i < Self::CAPACITY);
        self.data[i / 8] & (1 << (i % 8)) != 0
    }

    /// Whether slot `i` holds a live entry.
    pub fn is_readable(&self, i: usize) -> bool {
        debug_assert!(i < Self::CAPACITY);
        self.data[Self::READABLE_OFFSET + i / 8] & (1 << (i % 8)) != 0
    }

    /// Key stored in slot `i`.
    pub fn key_at(&self, i: usize) -> K {
        let off = Self::PAIRS_OFFSET + i * Self::ENTRY_SIZE;
        K::decode(&self.data[off..off + K::ENCODED_SIZE])
    }

    /// Value stored in slot `i`.
    pub fn value_at(&self, i: usize) -> V {
        let off = Self::PAIRS_OFFSET + i * Self::ENTRY_SIZE + K::ENCODED_SIZE;
        V::decode(&self.data[off..off + V::ENCODED_SIZE])
    }

    /// Append every live value stored under `key` to `out`. Returns whether
    /// anything matched.
    pub fn get_value<C: KeyComparator<K>>(&self, key: &K, cmp: &C, out: &mut Vec<V>) -> bool {
        let mut taken = 0;
        for i in 0..Self::CAPACITY {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && cmp.eq(key, &self.key_at(i)) {
                taken += 1;
                out.push(self.value_at(i));
            }
        }
        taken != 0
    }

    /// Slot of the first live entry equal to `(key, value)`.
    pub fn find<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> Option<usize> {
        for i in 0..Self::CAPACITY {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && cmp.eq(key, &self.key_at(i)) && self.value_at(i) == *value {
                return Some(i);
            }
        }
        None
    }

    /// Whether the exact `(key, value)` pair is present.
    pub fn contains<C: KeyComparator<K>>(&self, key: &K, value: &V, cmp: &C) -> bool {
        self.find(key, value, cmp).is_some()
    }

    /// Number of live entries. Scans only up to the first unoccupied slot,
    /// which the prefix invariant makes sound.
    pub fn num_readable(&self) -> usize {
        let mut taken = 0;
        for i in 0..Self::CAPACITY {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) {
                taken += 1;
            }
        }
        taken
    }

    /// Whether every slot holds a live entry.
    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::CAPACITY
    }

    /// Whether no slot holds a live entry.
    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Collect every live `(key, value)` pair, in slot order.
    pub fn entries(&self) -> Vec<(usize, K, V)> {
        let mut out = Vec::new();
        for i in 0..Self::CAPACITY {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) {
                out.push((i, self.key_at(i), self.value_at(i)));
            }
        }
        out
    }
}

/// Mutable view over a bucket page's bytes.
pub struct BucketViewMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: StorageKey, V: StorageValue> BucketViewMut<'a, K, V> {
    /// Wrap a page buffer.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than the bucket layout.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len()
                >= BucketView::<K, V>::PAIRS_OFFSET
                    + BucketView::<K, V>::CAPACITY * BucketView::<K, V>::ENTRY_SIZE,
            "buffer too small for bucket"
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only view over the same bytes.
    pub fn as_view(&self) -> BucketView<'_, K, V> {
        BucketView::new(self.data)
    }

    /// Insert `(key, value)` into the first non-readable slot.
    ///
    /// Returns `false` when the bucket is full or the exact pair is already
    /// present. A previously tombstoned slot is reused, so the occupied
    /// bits stay a prefix.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        let view = self.as_view();
        if view.is_full() || view.contains(key, value, cmp) {
            return false;
        }

        let slot = (0..BucketView::<K, V>::CAPACITY)
            .find(|&i| !view.is_readable(i))
            .expect("non-full bucket has a free slot");

        self.set_occupied(slot);
        self.set_readable(slot);
        let off = BucketView::<K, V>::PAIRS_OFFSET + slot * BucketView::<K, V>::ENTRY_SIZE;
        key.encode(&mut self.data[off..off + K::ENCODED_SIZE]);
        value.encode(
            &mut self.data[off + K::ENCODED_SIZE..off + BucketView::<K, V>::ENTRY_SIZE],
        );
        true
    }

    /// Remove the first live entry equal to `(key, value)`, leaving a
    /// tombstone. Returns whether a removal happened.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, cmp: &C) -> bool {
        match self.as_view().find(key, value, cmp) {
            Some(slot) => {
                self.clear_readable(slot);
                true
            }
            None => false,
        }
    }

    /// Tombstone slot `i` if it holds a live entry.
    pub fn remove_at(&mut self, i: usize) {
        let view = self.as_view();
        if !view.is_occupied(i) || !view.is_readable(i) {
            return;
        }
        self.clear_readable(i);
    }

    fn set_occupied(&mut self, i: usize) {
        self.data[i / 8] |= 1 << (i % 8);
    }

    fn set_readable(&mut self, i: usize) {
        self.data[BucketView::<K, V>::READABLE_OFFSET + i / 8] |= 1 << (i % 8);
    }

    fn clear_readable(&mut self, i: usize) {
        self.data[BucketView::<K, V>::READABLE_OFFSET + i / 8] &= !(1 << (i % 8));
    }
}
