//! Error types.

use std::fmt;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write
/// `Result<T>`, the same shorthand `std::io` uses.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in the storage layer.
///
/// Logical outcomes a caller is expected to handle in the normal course of
/// events (page not resident, duplicate entry, remove miss) are expressed as
/// `Ok(bool)` return values on the operations themselves; this enum covers
/// the conditions that abort an operation.
#[derive(Debug)]
pub enum Error {
    /// I/O error from disk operations.
    Io(std::io::Error),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when every frame is pinned.
    NoFreeFrames,

    /// The hash directory cannot grow past its maximum depth, so a bucket
    /// that must split has nowhere to put its entries.
    DirectoryFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::NoFreeFrames => write!(f, "No free frames available in buffer pool"),
            Error::DirectoryFull => write!(f, "Hash directory is at maximum depth"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
