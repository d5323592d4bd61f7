//! # Docket Core
//!
//! Embedded document storage engines.
//!
//! This crate provides:
//! - [`Collection`]: every record resident in memory, changes appended to a
//!   log by a background [`WriteQueue`]
//! - [`Database`]: only an id index resident, records read from disk on
//!   demand
//! - [`ConnectionCache`] and [`Connection`]: one shared engine per
//!   location, closed after a sliding idle timeout
//! - [`Identity`] and [`IdAccessor`]: how engines read and assign record ids
//!
//! Records are any `serde` type; the bytes on disk are produced by a
//! pluggable [`Codec`] ([`JsonCodec`] or [`CborCodec`]).
//!
//! ## Files
//!
//! | Engine | Files |
//! |--------|-------|
//! | `Collection` | `{name}.collection` (or `{name}.json` in snapshot mode) |
//! | `Database` | `{name}.db`, `{name}_index.db` |
//!
//! Files are owned by a single engine instance; sharing them between
//! processes is not supported.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
mod config;
mod connection;
pub mod database;
mod error;
mod identity;
mod queue;
mod stats;
mod types;

pub use collection::{Collection, Records};
pub use config::{CacheConfig, CollectionConfig};
pub use connection::{Connection, ConnectionCache, Engine};
pub use database::{Database, DatabaseIter};
pub use error::{CoreError, CoreResult};
pub use identity::{IdAccessor, Identity};
pub use queue::{BatchProcessor, FlushErrorHandler, WriteQueue};
pub use stats::{DatabaseStats, LogStats};
pub use types::{Location, SequenceNumber};

pub use docket_codec::{CborCodec, Codec, CodecError, JsonCodec};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
