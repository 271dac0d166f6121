//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct file operations: reading and
//! writing pages at fixed offsets in a single database file. Page id
//! allocation is owned by the buffer pool (ids are handed out in modular
//! strides across pool instances), so the disk manager makes no assumption
//! about which ids exist: reading a page that was never written yields
//! zeroes, and writing a page past the current end grows the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096     8192    ...    N×4096
/// ```
///
/// # Thread Safety
/// `DiskManager` is single-threaded; the buffer pool serializes access to it
/// behind a mutex.
///
/// # Durability
/// Writes are followed by `fsync()`. Conservative, and good enough until a
/// log manager takes over write ordering.
pub struct DiskManager {
    file: File,
    /// Number of pages currently backed by the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_count: 0,
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let metadata = file.metadata()?;
        let file_size = metadata.len();
        let page_count = file_size.div_ceil(PAGE_SIZE as u64) as u32;

        Ok(Self { file, page_count })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from disk.
    ///
    /// Pages beyond the end of the file (allocated by the pool but never
    /// flushed) read back as all zeroes; a partially backed page is
    /// zero-filled past the bytes the file holds.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        let mut page = Page::new();

        if page_id.0 >= self.page_count {
            return Ok(page);
        }

        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;

        let buf = page.as_mut_slice();
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(page)
    }

    /// Write a page to disk, extending the file if the page lies past the
    /// current end.
    ///
    /// # Durability
    /// Calls `fsync()` after writing.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        self.file.write_all(page.as_slice())?;
        self.file.sync_all()?;

        if page_id.0 >= self.page_count {
            self.page_count = page_id.0 + 1;
        }

        Ok(())
    }

    /// Record that a page id is no longer in use.
    ///
    /// The id space is monotonic; freed ids are not yet recycled, so this is
    /// bookkeeping only. The buffer pool calls it from `delete_page` so the
    /// reclamation point is already plumbed when an id free list lands.
    pub fn deallocate_page(&mut self, _page_id: PageId) {}

    /// Get the number of pages backed by the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }
}
