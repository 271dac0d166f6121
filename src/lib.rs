//! stratumdb - a paged storage substrate.
//!
//! # Architecture
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                   ExtendibleHashTable (index/)             │
//! │        directory page + bucket pages, split & merge        │
//! └────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Buffer Pool (buffer/)                  │
//! │   ParallelBufferPool ──▶ BufferPoolInstance × N            │
//! │   Frame + PageGuards + LruReplacer + Statistics            │
//! └────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Storage Layer (storage/)                │
//! │          DiskManager + Page + page codec views             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - shared primitives (PageId, Rid, Error, config)
//! - [`buffer`] - buffer pool management and eviction
//! - [`storage`] - disk I/O and page formats
//! - [`index`] - the extendible hash index
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use stratumdb::buffer::BufferPoolInstance;
//! use stratumdb::index::IntHashTable;
//! use stratumdb::storage::DiskManager;
//!
//! let disk = Arc::new(Mutex::new(DiskManager::create("my.db").unwrap()));
//! let pool = Arc::new(BufferPoolInstance::new(64, disk));
//! let index = IntHashTable::with_defaults(pool).unwrap();
//!
//! index.insert(&42, &1).unwrap();
//! assert_eq!(index.get(&42).unwrap(), vec![1]);
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, PageId, Result, Rid};

pub use buffer::{
    BufferPool, BufferPoolInstance, BufferPoolStats, Frame, FrameId, PageReadGuard,
    PageWriteGuard, ParallelBufferPool, StatsSnapshot,
};
pub use index::ExtendibleHashTable;
pub use storage::page::Page;
pub use storage::DiskManager;
