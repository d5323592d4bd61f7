//! Error types for Docket core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Docket core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage primitive error.
    #[error("storage error: {0}")]
    Storage(#[from] docket_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] docket_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid construction parameters.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// An explicit id is already in use.
    #[error("id {id} already exists")]
    DuplicateId {
        /// The conflicting id.
        id: i32,
    },

    /// The record type has no identity accessor.
    #[error("cannot {operation} without an id field")]
    MissingIdentity {
        /// The operation that needed the identity.
        operation: &'static str,
    },

    /// An encoded record does not fit the on-disk length field.
    #[error("encoded record is {len} bytes, must be between 1 and {max}")]
    PayloadSize {
        /// Encoded length.
        len: usize,
        /// Largest length the format can address.
        max: usize,
    },

    /// The storage file has outgrown the 32-bit offsets of the index log.
    #[error("storage file {path:?} exceeds the addressable size")]
    StorageFull {
        /// The storage file.
        path: PathBuf,
    },

    /// A log file holds bytes that cannot be a valid entry.
    #[error("corrupted log {path:?} at offset {offset}: {message}")]
    Corrupted {
        /// The log file.
        path: PathBuf,
        /// Byte offset of the bad entry.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A positional access was outside the collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Current length.
        len: usize,
    },

    /// A cached connection holds a different engine type than requested.
    #[error("connection {key} is already open with a different engine type")]
    ConnectionTypeMismatch {
        /// Display form of the cache key.
        key: String,
    },

    /// The engine has been closed.
    #[error("collection {name} is closed")]
    Closed {
        /// Name of the closed collection.
        name: String,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(path: impl Into<PathBuf>, offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    /// Creates a missing identity error.
    pub fn missing_identity(operation: &'static str) -> Self {
        Self::MissingIdentity { operation }
    }

    /// Creates a closed error.
    pub fn closed(name: impl Into<String>) -> Self {
        Self::Closed { name: name.into() }
    }
}
