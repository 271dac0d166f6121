//! Page types and layouts.
//!
//! [`Page`] is the raw 4KB buffer; the hash table pages are codec views
//! that interpret a page's bytes at fixed little-endian offsets rather than
//! reinterpreting the buffer as a struct.

mod hash_table_bucket_page;
mod hash_table_directory_page;
#[allow(clippy::module_inception)]
mod page;

pub use hash_table_bucket_page::{bucket_array_size, BucketView, BucketViewMut};
pub use hash_table_directory_page::{
    DirectoryView, DirectoryViewMut, DIRECTORY_ARRAY_SIZE, DIRECTORY_MAX_DEPTH,
};
pub use page::Page;
