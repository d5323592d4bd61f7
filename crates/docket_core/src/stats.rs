//! Engine statistics.
//!
//! Collections keep a few atomic counters that can be read while flushes
//! are in progress; [`Collection::stats`](crate::Collection::stats) and
//! [`Database::stats`](crate::Database::stats) combine them with the current
//! in-memory state into plain snapshot structs.

use crate::types::SequenceNumber;
use std::sync::atomic::{AtomicU64, Ordering};

/// Flush and compaction counters of one collection.
#[derive(Debug, Default)]
pub(crate) struct FlushCounters {
    flushes: AtomicU64,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    flush_errors: AtomicU64,
    compactions: AtomicU64,
}

impl FlushCounters {
    pub(crate) fn record_flush(&self, frames: u64, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub(crate) fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }
}

/// A point-in-time summary of an append-log collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogStats {
    /// Records currently live in memory.
    pub live_records: usize,
    /// Size of the log (or snapshot) file in bytes.
    pub log_bytes: u64,
    /// Sequence number the next frame will get.
    pub next_sequence: SequenceNumber,
    /// Mutations queued but not yet flushed.
    pub pending_writes: usize,
    /// Batches written since the collection was opened.
    pub flushes: u64,
    /// Frames appended since the collection was opened.
    pub frames_written: u64,
    /// Bytes appended since the collection was opened.
    pub bytes_written: u64,
    /// Flushes that failed since the collection was opened.
    pub flush_errors: u64,
    /// Log rewrites since the collection was opened.
    pub compactions: u64,
}

/// A point-in-time summary of an indexed database.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Records present in the index.
    pub records: usize,
    /// Size of `{name}.db` in bytes.
    pub storage_bytes: u64,
    /// Size of `{name}_index.db` in bytes.
    pub index_bytes: u64,
    /// Bytes in the storage file no longer referenced by the index.
    pub dead_bytes: u64,
    /// Highest id seen so far.
    pub max_id: i32,
}
