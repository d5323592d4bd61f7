//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a file.
    #[error("read beyond end of file: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current file size.
        size: u64,
    },

    /// Attempted to truncate a file to a length larger than it is.
    #[error("cannot truncate {path:?} to {requested} bytes, file is only {size} bytes")]
    TruncateBeyondEnd {
        /// File being truncated.
        path: PathBuf,
        /// Requested new length.
        requested: u64,
        /// Current length.
        size: u64,
    },
}
