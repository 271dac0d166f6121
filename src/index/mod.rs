//! Index structures.
//!
//! - [`key`] - fixed-width key/value codecs, comparators, hash functions
//! - [`ExtendibleHashTable`] - disk-backed extendible hash index

mod extendible_hash_table;
pub mod key;

pub use extendible_hash_table::ExtendibleHashTable;

use crate::common::Rid;
use key::{Crc32HashFn, GenericKey, OrdComparator};

/// Hash index over plain integer keys and values.
pub type IntHashTable<P> =
    ExtendibleHashTable<i32, i32, P, OrdComparator<i32>, Crc32HashFn>;

/// Hash index over `N`-byte opaque keys and record ids, the shape a catalog
/// instantiates for secondary indexes (N = 4, 8, 16, 32, or 64).
pub type GenericHashTable<const N: usize, P> =
    ExtendibleHashTable<GenericKey<N>, Rid, P, OrdComparator<GenericKey<N>>, Crc32HashFn>;
