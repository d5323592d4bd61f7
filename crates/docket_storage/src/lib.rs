//! # Docket Storage
//!
//! File primitives shared by the Docket collection engines.
//!
//! Everything in this crate treats files as **opaque byte logs**. The
//! engines in `docket_core` own the framing of those bytes; this crate
//! only knows how to append, read back, cut off a torn tail and swap a
//! rebuilt file into place.
//!
//! ## Design Principles
//!
//! - Files are only ever appended to, truncated back to a known-good
//!   length, or replaced wholesale by a rename
//! - Rebuilt files are fully written and synced before they replace the
//!   original
//! - Callers provide their own locking; nothing here is shared across
//!   threads implicitly
//!
//! ## Example
//!
//! ```rust
//! use docket_storage::AppendFile;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut file = AppendFile::open(&dir.path().join("log.bin")).unwrap();
//! let offset = file.append(b"hello world").unwrap();
//! assert_eq!(file.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod read;
mod replace;

pub use error::{StorageError, StorageResult};
pub use file::AppendFile;
pub use read::{read_full, ReadOutcome};
pub use replace::{remove_if_exists, replace_file, sync_directory, write_atomic};
